use std::collections::VecDeque;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::TradeResult;
use crate::shutdown::Shutdown;

/// Rolling performance tracker over the last N trade results.
///
/// Pure accumulation; a task subscribed to the event bus feeds it and logs
/// a summary after each close.
pub struct StatsTracker {
    window: usize,
    recent: VecDeque<f64>,
    total_trades: u64,
    wins: u64,
    cumulative_pnl: f64,
    peak_pnl: f64,
    max_drawdown: f64,
}

impl StatsTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            recent: VecDeque::new(),
            total_trades: 0,
            wins: 0,
            cumulative_pnl: 0.0,
            peak_pnl: 0.0,
            max_drawdown: 0.0,
        }
    }

    pub fn on_result(&mut self, pnl: f64) {
        self.total_trades += 1;
        if pnl > 0.0 {
            self.wins += 1;
        }
        self.cumulative_pnl += pnl;
        if self.cumulative_pnl > self.peak_pnl {
            self.peak_pnl = self.cumulative_pnl;
        }
        let drawdown = self.peak_pnl - self.cumulative_pnl;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }

        self.recent.push_back(pnl);
        while self.recent.len() > self.window {
            self.recent.pop_front();
        }
    }

    pub fn total_trades(&self) -> u64 {
        self.total_trades
    }

    /// Lifetime win rate in [0, 1]
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.total_trades as f64
    }

    /// Win rate over the rolling window
    pub fn rolling_win_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let wins = self.recent.iter().filter(|p| **p > 0.0).count();
        wins as f64 / self.recent.len() as f64
    }

    pub fn cumulative_pnl(&self) -> f64 {
        self.cumulative_pnl
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn summary(&self) -> String {
        format!(
            "trades={} win_rate={:.1}% rolling={:.1}% pnl={:+.4} max_dd={:.4}",
            self.total_trades,
            self.win_rate() * 100.0,
            self.rolling_win_rate() * 100.0,
            self.cumulative_pnl,
            self.max_drawdown,
        )
    }
}

/// Subscribe to trade results and log a running summary
pub fn spawn_tracker(
    window: usize,
    mut events: broadcast::Receiver<TradeResult>,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tracker = StatsTracker::new(window);
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                event = events.recv() => match event {
                    Ok(result) => {
                        tracker.on_result(result.pnl);
                        tracing::info!("📊 {}", tracker.summary());
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("stats tracker lagged, skipped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_win_rate() {
        let mut t = StatsTracker::new(10);
        t.on_result(1.0);
        t.on_result(-0.5);
        t.on_result(2.0);
        t.on_result(-1.0);

        assert_eq!(t.total_trades(), 4);
        assert_eq!(t.win_rate(), 0.5);
    }

    #[test]
    fn test_cumulative_and_drawdown() {
        let mut t = StatsTracker::new(10);
        t.on_result(3.0); // peak 3
        t.on_result(-1.0); // dd 1
        t.on_result(-1.5); // dd 2.5
        t.on_result(4.0); // new peak 4.5

        assert!((t.cumulative_pnl() - 4.5).abs() < 1e-9);
        assert!((t.max_drawdown() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_window() {
        let mut t = StatsTracker::new(2);
        t.on_result(-1.0);
        t.on_result(-1.0);
        t.on_result(1.0);
        t.on_result(1.0);

        // window holds the last two, both wins
        assert_eq!(t.rolling_win_rate(), 1.0);
        // lifetime rate still counts the losses
        assert_eq!(t.win_rate(), 0.5);
    }

    #[test]
    fn test_empty_tracker() {
        let t = StatsTracker::new(5);
        assert_eq!(t.win_rate(), 0.0);
        assert_eq!(t.rolling_win_rate(), 0.0);
        assert_eq!(t.cumulative_pnl(), 0.0);
    }
}
