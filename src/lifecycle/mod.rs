// Order lifecycle: entry placement, exit pair, reconciliation
pub mod fill_rules;
pub mod reconcile;
pub mod trade;

pub use reconcile::{FillNotice, Reconciler};
pub use trade::{ExitPair, Trade, TradePhase};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

use crate::config::Settings;
use crate::exchange::{
    ContractDetail, ExchangeGateway, FillCheck, OrderRequest, OrderStatus, OrderType, RetryPolicy,
};
use crate::models::{EntrySignal, Side, TradeResult};
use crate::risk::{RiskGuard, RiskLimits};
use crate::shutdown::Shutdown;
use crate::sizing::{self, floor_to_tick, SizeTooSmall};
use crate::state::{PersistedState, StateStore};

/// Typed reason a `place_entry` call was refused, so the signal loop can
/// log distinctly and decide whether the next signal should retry.
#[derive(Debug, Error)]
pub enum EntryRefusal {
    /// A trade is open, a lock window is active, or the live position check
    /// failed (fail closed: "position may exist" refuses entry)
    #[error("a trade is already open or position state is unverifiable")]
    AlreadyOpen,
    #[error(transparent)]
    SizeTooSmall(#[from] SizeTooSmall),
    #[error("trading halted by risk guard")]
    Halted,
    #[error("exchange rejected entry: {0}")]
    ExchangeRejected(String),
}

/// State owned by the single-writer critical section.
///
/// Every mutation of the trade, the sizing ladder, or the risk counters
/// happens with this locked; entry placement and reconciliation serialize
/// here.
pub(crate) struct Core {
    pub trade: Option<Trade>,
    /// Sizing level the next entry will use
    pub level: u32,
    pub guard: RiskGuard,
    /// Debounce window after a submission, while the exchange may not have
    /// indexed the order yet
    pub lock_until: Option<Instant>,
    pub last_price: Option<f64>,
    pub balance: f64,
}

impl Core {
    fn lock_active(&self) -> bool {
        self.lock_until.map(|t| Instant::now() < t).unwrap_or(false)
    }
}

/// Orchestrates entry submission, exit-pair placement, and the current
/// position snapshot. One instance per tracked instrument.
pub struct LifecycleManager {
    gateway: Arc<dyn ExchangeGateway>,
    store: StateStore,
    settings: Settings,
    precision: ContractDetail,
    events: broadcast::Sender<TradeResult>,
    shutdown: Shutdown,
    status_retry: RetryPolicy,
    exit_retry: RetryPolicy,
    core: Mutex<Core>,
}

impl LifecycleManager {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        store: StateStore,
        settings: Settings,
        precision: ContractDetail,
        events: broadcast::Sender<TradeResult>,
        shutdown: Shutdown,
        restored: Option<PersistedState>,
    ) -> Self {
        let mut level = 0;
        let mut restored_trade = None;
        if let Some(snapshot) = &restored {
            level = snapshot.sizing_level;
            restored_trade = Self::restore_trade(snapshot, &settings, precision.tick);
            match &restored_trade {
                Some(trade) => tracing::info!(
                    "restored open trade {} ({} size={}) at level {}",
                    trade.trade_id,
                    trade.side,
                    trade.size,
                    level
                ),
                None => tracing::info!("restored sizing ladder at level {}", level),
            }
        }

        let guard = RiskGuard::new(RiskLimits {
            max_daily_loss_pct: settings.max_daily_loss_pct,
            max_consecutive_losses: settings.max_consecutive_losses,
            window: settings.max_consecutive_losses as usize,
        });

        let status_retry = RetryPolicy::new(
            settings.status_retry_attempts,
            Duration::from_secs(settings.status_retry_interval_secs),
        );
        let exit_retry = RetryPolicy::new(settings.exit_retry_attempts, Duration::from_secs(1));

        Self {
            gateway,
            store,
            precision,
            events,
            shutdown,
            status_retry,
            exit_retry,
            core: Mutex::new(Core {
                trade: restored_trade,
                level,
                guard,
                lock_until: None,
                last_price: None,
                balance: settings.initial_balance,
            }),
            settings,
        }
    }

    /// Rebuild the active trade from a snapshot, or None when the snapshot
    /// carries nothing trackable (sizing ladder only).
    ///
    /// A trade is restorable once its entry fill is known; exit prices are
    /// recomputed from the fill since the snapshot stores only order ids.
    fn restore_trade(snapshot: &PersistedState, settings: &Settings, tick: f64) -> Option<Trade> {
        let trade_id = snapshot.trade_id.clone()?;
        let side = snapshot.side?;
        let entry_price = snapshot.entry_price?;

        let offset = settings.offset_for(entry_price);
        let sl_price = match side {
            Side::Long => floor_to_tick(entry_price - offset, tick),
            Side::Short => floor_to_tick(entry_price + offset, tick),
        };
        let exits = ExitPair {
            tp: snapshot.tp_order_id.clone(),
            sl: snapshot.sl_order_id.clone(),
        };
        let sl_attached = settings.attach_entry_stop;
        let phase = if exits.tp.is_some() && (sl_attached || exits.sl.is_some()) {
            TradePhase::ExitPlaced
        } else {
            TradePhase::EntryFilled
        };

        Some(Trade {
            trade_id,
            side,
            size: snapshot.order_size,
            sizing_level: snapshot.sizing_level,
            trigger_price: entry_price,
            sl_price,
            submit_gap: 0.0,
            sl_attached,
            entry_order_id: None,
            entry_price: Some(entry_price),
            exits,
            opened_at: chrono::DateTime::from_timestamp(snapshot.last_trade_time, 0)
                .unwrap_or_else(Utc::now),
            phase,
            closing: false,
        })
    }

    /// Submit a market entry with its stop-loss derived from the trigger.
    ///
    /// Refuses while a trade is open. The open check combines local state
    /// with a live exchange query inside the same critical section as the
    /// mutation, so two concurrent calls cannot both pass it.
    pub async fn place_entry(&self, signal: &EntrySignal) -> Result<String, EntryRefusal> {
        let mut core = self.core.lock().await;

        if core.guard.is_halted() {
            return Err(EntryRefusal::Halted);
        }
        if core.trade.is_some() || core.lock_active() {
            return Err(EntryRefusal::AlreadyOpen);
        }
        match self.gateway.open_position_size(&self.settings.symbol).await {
            Ok(open) if open.abs() > f64::EPSILON => return Err(EntryRefusal::AlreadyOpen),
            Ok(_) => {}
            Err(e) => {
                // fail closed: unverifiable means "may exist"
                tracing::error!("position check failed, refusing entry: {}", e);
                return Err(EntryRefusal::AlreadyOpen);
            }
        }

        let size = sizing::next_size(
            self.settings.lot_size,
            self.settings.martin_factor,
            core.level,
            self.precision.min_step,
        )?;

        let offset = self.settings.offset_for(signal.trigger_price);
        let sl_price = match signal.side {
            Side::Long => signal.trigger_price - offset,
            Side::Short => signal.trigger_price + offset,
        };
        let sl_price = floor_to_tick(sl_price, self.precision.tick);
        let attach = self.settings.attach_entry_stop && self.gateway.supports_attached_stop();

        let request = OrderRequest {
            symbol: self.settings.symbol.clone(),
            side: signal.side,
            reduce_only: false,
            order_type: OrderType::Market,
            size,
            price: None,
            trigger_price: None,
            attached_stop: attach.then_some(sl_price),
            leverage: self.settings.leverage,
        };
        let entry_order_id = self
            .gateway
            .submit_order(&request)
            .await
            .map_err(|e| EntryRefusal::ExchangeRejected(e.to_string()))?;

        let now = Utc::now();
        let submit_gap = core
            .last_price
            .map(|p| (p - signal.trigger_price).abs())
            .unwrap_or(0.0);
        let trade = Trade::new(
            now,
            signal.side,
            size,
            core.level,
            signal.trigger_price,
            sl_price,
            submit_gap,
            attach,
            entry_order_id.clone(),
        );
        let trade_id = trade.trade_id.clone();

        tracing::info!(
            "🚀 entry {} {} size={} SL={} level={} order={}",
            trade_id,
            signal.side,
            size,
            sl_price,
            core.level,
            entry_order_id
        );

        core.trade = Some(trade);
        core.lock_until =
            Some(Instant::now() + Duration::from_secs(self.settings.lock_window_secs));
        self.persist(&core).await;
        Ok(trade_id)
    }

    /// True if a lock window is active, the exchange reports an open
    /// position, or local trade state is non-empty
    pub async fn is_position_open(&self) -> bool {
        let core = self.core.lock().await;
        if core.lock_active() || core.trade.is_some() {
            return true;
        }
        match self.gateway.open_position_size(&self.settings.symbol).await {
            Ok(open) => open.abs() > f64::EPSILON,
            Err(e) => {
                tracing::warn!("position query failed, assuming open: {}", e);
                true
            }
        }
    }

    /// Feed the latest market price (used by the timeout-deferral heuristic)
    pub async fn update_market_price(&self, price: f64) {
        self.core.lock().await.last_price = Some(price);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradeResult> {
        self.events.subscribe()
    }

    pub async fn sizing_level(&self) -> u32 {
        self.core.lock().await.level
    }

    pub async fn is_halted(&self) -> bool {
        self.core.lock().await.guard.is_halted()
    }

    /// Manual reset: ladder back to base size, active trade forgotten
    pub async fn reset_martingale(&self) {
        let mut core = self.core.lock().await;
        core.level = 0;
        core.trade = None;
        core.lock_until = None;
        self.persist(&core).await;
        tracing::info!("martingale ladder reset");
    }

    /// Explicit operator reset of a latched risk-guard halt
    pub async fn reset_risk_guard(&self) {
        self.core.lock().await.guard.reset();
    }

    /// Write the current snapshot; persistence failures are logged as
    /// critical but never roll back the transition that triggered the save
    /// (the exchange-side order already exists).
    pub(crate) async fn persist(&self, core: &Core) {
        let state = match &core.trade {
            Some(trade) => PersistedState {
                trade_id: Some(trade.trade_id.clone()),
                order_size: trade.size,
                sizing_level: core.level,
                side: Some(trade.side),
                entry_price: trade.entry_price,
                tp_order_id: trade.exits.tp.clone(),
                sl_order_id: trade.exits.sl.clone(),
                last_trade_time: Utc::now().timestamp(),
            },
            None => PersistedState::idle(core.level, Utc::now()),
        };
        if let Err(e) = self.store.save(&state).await {
            tracing::error!("CRITICAL: failed to persist trade state: {}", e);
        }
    }

    /// Status check with bounded retries absorbing eventual-consistency lag.
    ///
    /// Ambiguous outcomes (unknown status, exhausted retries) collapse to
    /// `Pending`: the system never guesses a fill.
    pub(crate) async fn check_order_with_retry(&self, order_id: &str) -> FillCheck {
        let gateway = self.gateway.clone();
        let id = order_id.to_string();
        let result = self
            .status_retry
            .run(&self.shutdown, || {
                let gateway = gateway.clone();
                let id = id.clone();
                async move {
                    match gateway.query_order(&id).await {
                        Ok(record) if record.status == OrderStatus::Unknown => Err(
                            crate::exchange::GatewayError::Transport("status unknown".to_string()),
                        ),
                        other => other,
                    }
                }
            })
            .await;

        match result {
            Ok(record) => match record.status {
                OrderStatus::Filled => FillCheck::Filled {
                    avg_price: record.avg_price,
                },
                OrderStatus::Canceled => FillCheck::Canceled,
                OrderStatus::Open | OrderStatus::Unknown => FillCheck::Pending {
                    last_seen: Some(record),
                },
            },
            Err(e) => {
                tracing::warn!("status check for {} exhausted retries: {}", order_id, e);
                FillCheck::Pending { last_seen: None }
            }
        }
    }

    /// Cancel with bounded retries; false means the order must not be
    /// assumed canceled
    pub(crate) async fn cancel_with_retry(&self, order_id: &str) -> bool {
        let gateway = self.gateway.clone();
        let id = order_id.to_string();
        let result = self
            .status_retry
            .run(&self.shutdown, || {
                let gateway = gateway.clone();
                let id = id.clone();
                async move { gateway.cancel_order(&id).await }
            })
            .await;
        match result {
            Ok(()) => {
                tracing::info!("🛑 canceled order {}", order_id);
                true
            }
            Err(e) => {
                tracing::error!("cancel of {} failed: {}", order_id, e);
                false
            }
        }
    }

    /// Submit an exit leg with short bounded backoff
    pub(crate) async fn submit_exit_with_retry(&self, request: &OrderRequest) -> Option<String> {
        let gateway = self.gateway.clone();
        let request = request.clone();
        let result = self
            .exit_retry
            .run(&self.shutdown, || {
                let gateway = gateway.clone();
                let request = request.clone();
                async move { gateway.submit_order(&request).await }
            })
            .await;
        match result {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!("exit order submission exhausted retries: {}", e);
                None
            }
        }
    }
}
