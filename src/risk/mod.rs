use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Risk thresholds that halt new entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Daily loss as a positive percent of the running balance
    pub max_daily_loss_pct: f64,
    pub max_consecutive_losses: u32,
    /// Size of the recent-results ring buffer
    pub window: usize,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 2.0,
            max_consecutive_losses: 10,
            window: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    DailyLoss,
    ConsecutiveLosses,
}

/// Observes trade outcomes and halts further entries once a loss-streak or
/// daily drawdown threshold is breached.
///
/// Advisory backpressure only: the guard gates `place_entry` and never
/// touches the martingale sizing level. A breach latches until `reset()`.
#[derive(Debug)]
pub struct RiskGuard {
    limits: RiskLimits,
    day: NaiveDate,
    daily_pnl: f64,
    recent: VecDeque<f64>,
    halted: Option<HaltReason>,
}

impl RiskGuard {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            day: Utc::now().date_naive(),
            daily_pnl: 0.0,
            recent: VecDeque::new(),
            halted: None,
        }
    }

    /// Record a trade result; returns the halt reason if this result tripped
    /// a threshold. `now` is explicit so day rollover is testable.
    pub fn on_trade_result(
        &mut self,
        pnl: f64,
        balance: f64,
        now: DateTime<Utc>,
    ) -> Option<HaltReason> {
        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.daily_pnl = 0.0;
            self.recent.clear();
        }

        self.daily_pnl += pnl;
        self.recent.push_back(pnl);
        while self.recent.len() > self.limits.window {
            self.recent.pop_front();
        }

        if self.halted.is_some() {
            return self.halted;
        }

        if balance > 0.0 {
            let daily_loss_pct = self.daily_pnl / balance * 100.0;
            if daily_loss_pct <= -self.limits.max_daily_loss_pct {
                tracing::error!(
                    "risk guard: daily loss {:.2}% breached -{}% limit, halting entries",
                    daily_loss_pct,
                    self.limits.max_daily_loss_pct
                );
                self.halted = Some(HaltReason::DailyLoss);
                return self.halted;
            }
        }

        if self.consecutive_losses() >= self.limits.max_consecutive_losses {
            tracing::error!(
                "risk guard: {} losses in window, halting entries",
                self.consecutive_losses()
            );
            self.halted = Some(HaltReason::ConsecutiveLosses);
        }
        self.halted
    }

    /// Losing trades in the recent window
    pub fn consecutive_losses(&self) -> u32 {
        self.recent.iter().filter(|pnl| **pnl < 0.0).count() as u32
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halted
    }

    /// Explicit external reset; the latched halt never clears on its own
    pub fn reset(&mut self) {
        self.halted = None;
        self.recent.clear();
        self.daily_pnl = 0.0;
        tracing::info!("risk guard reset");
    }
}
