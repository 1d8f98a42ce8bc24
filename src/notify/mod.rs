use reqwest::Client;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::TradeResult;
use crate::shutdown::Shutdown;

/// Capacity of the trade-result broadcast channel; slow subscribers that
/// lag past this simply miss events, the core never blocks on them
const EVENT_CAPACITY: usize = 64;

pub fn event_channel() -> broadcast::Sender<TradeResult> {
    broadcast::channel(EVENT_CAPACITY).0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn prefix(&self) -> &'static str {
        match self {
            Level::Info => "ℹ️",
            Level::Warn => "⚠️",
            Level::Error => "🚨",
        }
    }
}

/// Fire-and-forget Discord webhook notifier.
///
/// Delivery failures are logged and dropped; trading never waits on, or
/// fails because of, a notification.
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            webhook_url,
        }
    }

    pub async fn send(&self, level: Level, message: &str) {
        let Some(url) = &self.webhook_url else {
            return;
        };
        let body = json!({ "content": format!("{} {}", level.prefix(), message) });
        match self.client.post(url).json(&body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!("discord webhook returned {}", resp.status());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("discord webhook send failed: {}", e),
        }
    }
}

/// Subscribe to trade results and forward them to the notifier
pub fn spawn_forwarder(
    notifier: Notifier,
    mut events: broadcast::Receiver<TradeResult>,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                event = events.recv() => match event {
                    Ok(result) => {
                        let msg = format!(
                            "{} {} closed via {} @ {:.4} | pnl {:+.4} | size {} | level {}",
                            result.trade_id,
                            result.side,
                            result.exit_type,
                            result.exit_price,
                            result.pnl,
                            result.size,
                            result.sizing_level,
                        );
                        let level = if result.pnl >= 0.0 { Level::Info } else { Level::Warn };
                        notifier.send(level, &msg).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("notification forwarder lagged, skipped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}
