use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;

use futuresbot::config::Settings;
use futuresbot::exchange::{ExchangeGateway, MexcGateway, PaperGateway};
use futuresbot::lifecycle::{EntryRefusal, LifecycleManager, Reconciler};
use futuresbot::notify::{self, Level, Notifier};
use futuresbot::shutdown::Shutdown;
use futuresbot::state::StateStore;
use futuresbot::stats;
use futuresbot::strategy::{CandleWindow, ConsecutiveCandles, SignalSource};

/// How many confirmed bars the rolling window keeps
const CANDLE_WINDOW: usize = 120;
const WARMUP_BARS: usize = 30;

#[derive(Parser, Debug)]
#[command(name = "futuresbot", about = "Leveraged futures martingale bot")]
struct Args {
    /// Trade against the in-memory paper exchange instead of live
    #[arg(long)]
    paper: bool,

    /// Override the trade state file path
    #[arg(long)]
    state_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();
    let args = Args::parse();

    let mut settings = Settings::load().context("loading settings")?;
    if let Some(path) = args.state_file {
        settings.state_file = path;
    }

    tracing::info!(
        "🚀 futuresbot starting ({} mode, symbol {})",
        if args.paper { "paper" } else { "live" },
        settings.symbol
    );

    let gateway: Arc<dyn ExchangeGateway> = if args.paper {
        Arc::new(PaperGateway::new(100.0))
    } else {
        Arc::new(MexcGateway::new(
            &settings.base_url,
            &settings.api_key,
            &settings.api_secret,
        ))
    };

    let precision = gateway
        .contract_detail(&settings.symbol)
        .await
        .context("fetching contract precision")?;
    tracing::info!(
        "precision: tick={} min_step={}",
        precision.tick,
        precision.min_step
    );

    let store = StateStore::new(&settings.state_file);
    let restored = store
        .load(settings.reset_timeout_secs)
        .await
        .context("loading persisted trade state")?;

    let events = notify::event_channel();
    let (shutdown_handle, shutdown) = Shutdown::new();

    let manager = Arc::new(LifecycleManager::new(
        gateway.clone(),
        store,
        settings.clone(),
        precision,
        events.clone(),
        shutdown.clone(),
        restored,
    ));

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Base lot: {}", settings.lot_size);
    tracing::info!("  Martingale factor: x{}", settings.martin_factor);
    tracing::info!("  Max level: {}", settings.max_level);
    tracing::info!("  TP/SL offset: {}%", settings.offset_pct);
    tracing::info!("  Leverage: {}x", settings.leverage);
    tracing::info!("  Restored level: {}", manager.sizing_level().await);

    let notifier = Notifier::new(settings.discord_webhook_url.clone());
    let notify_task =
        notify::spawn_forwarder(notifier.clone(), events.subscribe(), shutdown.clone());
    let stats_task = stats::spawn_tracker(settings.stats_window, events.subscribe(), shutdown.clone());

    // a websocket listener can push fill notices through this sender to
    // trigger an immediate reconcile pass; the timer covers it otherwise
    let (_fill_tx, fill_rx) = mpsc::channel(16);
    let reconciler = Reconciler::new(
        manager.clone(),
        fill_rx,
        shutdown.clone(),
        Duration::from_secs(settings.reconcile_interval_secs),
    );
    let reconcile_task = tokio::spawn(reconciler.run());

    let signal_task = {
        let gateway = gateway.clone();
        let manager = manager.clone();
        let settings = settings.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            signal_loop(gateway, manager, settings, shutdown).await;
        })
    };

    notifier
        .send(Level::Info, "futuresbot started - waiting for first bar")
        .await;
    tracing::info!("Press Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
        result = manager_watch(manager.clone(), shutdown.clone()) => {
            tracing::error!("halt watcher exited: {:?}", result);
        }
    }

    // in-flight TP/SL orders are intentionally left live; a restart
    // rediscovers them from the state file plus a live exchange query
    shutdown_handle.trigger();
    let _ = signal_task.await;
    let _ = reconcile_task.await;
    let _ = notify_task.await;
    let _ = stats_task.await;

    notifier.send(Level::Info, "futuresbot stopped").await;
    tracing::info!("👋 futuresbot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "futuresbot=info".into()),
        )
        .init();
}

/// Surface a latched risk-guard halt once, then keep the process alive so
/// the operator can inspect and reset
async fn manager_watch(manager: Arc<LifecycleManager>, shutdown: Shutdown) {
    let mut announced = false;
    loop {
        if !shutdown.sleep(Duration::from_secs(10)).await {
            break;
        }
        if manager.is_halted().await && !announced {
            tracing::error!("🛑 trading halted by risk guard - entries refused until reset");
            announced = true;
        }
    }
}

/// Poll confirmed 1m bars, feed the strategy, and place entries it signals
async fn signal_loop(
    gateway: Arc<dyn ExchangeGateway>,
    manager: Arc<LifecycleManager>,
    settings: Settings,
    shutdown: Shutdown,
) {
    let strategy =
        ConsecutiveCandles::new(settings.consecutive_candles, settings.direction_match_check);
    let mut window = CandleWindow::new(CANDLE_WINDOW);

    // warm-up prefill for an instant start
    match gateway.recent_candles(&settings.symbol, WARMUP_BARS).await {
        Ok(candles) => {
            let n = candles
                .into_iter()
                .filter(|c| window.push(c.clone()))
                .count();
            tracing::info!("prefilled {} bars → instant start", n);
        }
        Err(e) => tracing::warn!("warm-up fetch failed, starting cold: {}", e),
    }

    loop {
        if !shutdown
            .sleep(Duration::from_secs(settings.poll_interval_secs))
            .await
        {
            break;
        }

        let candles = match gateway.recent_candles(&settings.symbol, 2).await {
            Ok(candles) => candles,
            Err(e) => {
                tracing::warn!("candle poll failed: {}", e);
                continue;
            }
        };
        let Some(confirmed) = candles.iter().rev().find(|c| c.confirmed) else {
            continue;
        };
        manager.update_market_price(confirmed.close).await;
        if !window.push(confirmed.clone()) {
            continue; // same bar as last poll
        }
        if window.len() < strategy.min_candles() {
            continue;
        }
        let Some(signal) = strategy.next_signal(&window.as_slice()) else {
            continue;
        };

        tracing::info!(
            "signal: {} trigger={}",
            signal.side,
            signal.trigger_price
        );
        match manager.place_entry(&signal).await {
            Ok(trade_id) => tracing::info!("entry accepted: {}", trade_id),
            Err(EntryRefusal::AlreadyOpen) => {
                tracing::debug!("signal skipped: trade already open")
            }
            Err(EntryRefusal::Halted) => {
                tracing::warn!("signal skipped: trading halted by risk guard")
            }
            Err(e @ EntryRefusal::SizeTooSmall(_)) => {
                tracing::error!("signal refused: {}", e)
            }
            Err(EntryRefusal::ExchangeRejected(msg)) => {
                tracing::error!("entry rejected by exchange: {}", msg)
            }
        }
    }
    tracing::info!("signal loop stopped");
}
