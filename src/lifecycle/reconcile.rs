use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::{fill_rules, Core, LifecycleManager, TradePhase};
use crate::exchange::{FillCheck, OrderRequest, OrderType};
use crate::models::{ExitKind, TradeResult};
use crate::shutdown::Shutdown;
use crate::sizing::{self, floor_to_tick};

impl LifecycleManager {
    /// One reconciliation pass: align local trade state with the exchange.
    ///
    /// Idempotent; the timer tick and external fill notifications both call
    /// this, and overlapping calls serialize on the core lock. Every branch
    /// re-checks that the order id it acts on is still present, so a
    /// duplicate notification cannot double-count a fill (which would
    /// double-apply the martingale step).
    pub async fn reconcile_once(&self) {
        let mut core = self.core.lock().await;

        let Some((phase, closing)) = core.trade.as_ref().map(|t| (t.phase, t.closing)) else {
            return;
        };
        if closing {
            self.drain_closing(&mut core).await;
            return;
        }
        match phase {
            TradePhase::EntrySubmitted => self.check_entry(&mut core).await,
            TradePhase::EntryFilled => self.ensure_exit_pair(&mut core).await,
            TradePhase::ExitPlaced => self.check_exits(&mut core).await,
        }
    }

    async fn check_entry(&self, core: &mut Core) {
        let Some((entry_id, trigger, submit_gap, opened_at, size)) =
            core.trade.as_ref().and_then(|t| {
                t.entry_order_id
                    .as_ref()
                    .map(|id| (id.clone(), t.trigger_price, t.submit_gap, t.opened_at, t.size))
            })
        else {
            return;
        };

        match self.check_order_with_retry(&entry_id).await {
            FillCheck::Filled { avg_price } => {
                self.on_entry_filled(core, avg_price).await;
            }
            FillCheck::Canceled => {
                tracing::warn!("entry order {} canceled, clearing trade", entry_id);
                core.trade = None;
                self.persist(core).await;
            }
            FillCheck::Pending { last_seen } => {
                let (filled_qty, amount) = last_seen
                    .map(|r| (r.filled_qty, r.amount))
                    .unwrap_or((0.0, size));
                let cancel = fill_rules::should_cancel_entry(
                    opened_at,
                    Utc::now(),
                    self.settings.order_timeout_secs,
                    filled_qty,
                    amount,
                    self.settings.partial_fill_threshold,
                    core.last_price,
                    trigger,
                    submit_gap,
                    self.settings.timeout_defer_ratio,
                );
                if !cancel {
                    return;
                }
                tracing::warn!("entry order {} expired, canceling", entry_id);
                let cancel_ok = self.cancel_with_retry(&entry_id).await;
                // the cancel can race the fill; re-check before clearing
                match self.check_order_with_retry(&entry_id).await {
                    FillCheck::Filled { avg_price } => self.on_entry_filled(core, avg_price).await,
                    FillCheck::Canceled => {
                        core.trade = None;
                        self.persist(core).await;
                    }
                    FillCheck::Pending { .. } => {
                        if cancel_ok {
                            core.trade = None;
                            self.persist(core).await;
                        } else {
                            // the order may still be live; keep the trade
                            // and retry the cancel next cycle
                            tracing::warn!(
                                "cancel of expired entry {} unconfirmed, retrying",
                                entry_id
                            );
                        }
                    }
                }
            }
        }
    }

    async fn on_entry_filled(&self, core: &mut Core, avg_price: f64) {
        {
            let Some(trade) = core.trade.as_mut() else {
                return;
            };
            trade.entry_order_id = None;
            trade.entry_price = Some(avg_price);
            trade.phase = TradePhase::EntryFilled;
            tracing::info!(
                "✅ entry filled {} {} size={} @ {}",
                trade.trade_id,
                trade.side,
                trade.size,
                avg_price
            );
        }
        self.persist(core).await;
        self.ensure_exit_pair(core).await;
    }

    /// Place whichever exit legs are still missing.
    ///
    /// A naked position without exit orders is an unacceptable risk state,
    /// so failed submissions leave the trade in `EntryFilled` and this runs
    /// again next cycle instead of abandoning the trade.
    async fn ensure_exit_pair(&self, core: &mut Core) {
        let Some((side, size, entry_price, trigger, sl_price, need_tp, need_sl)) =
            core.trade.as_ref().and_then(|t| {
                let entry = t.entry_price?;
                Some((
                    t.side,
                    t.size,
                    entry,
                    t.trigger_price,
                    t.sl_price,
                    t.exits.tp.is_none(),
                    !t.sl_attached && t.exits.sl.is_none(),
                ))
            })
        else {
            return;
        };

        let offset = self.settings.offset_for(trigger);
        let tp_price = floor_to_tick(entry_price + offset * side.sign(), self.precision.tick);

        if need_tp {
            let request = OrderRequest {
                symbol: self.settings.symbol.clone(),
                side,
                reduce_only: true,
                order_type: OrderType::Limit,
                size,
                price: Some(tp_price),
                trigger_price: None,
                attached_stop: None,
                leverage: self.settings.leverage,
            };
            if let Some(id) = self.submit_exit_with_retry(&request).await {
                tracing::info!("📌 TP placed @ {} ({})", tp_price, id);
                if let Some(trade) = core.trade.as_mut() {
                    trade.exits.tp = Some(id);
                }
            }
        }

        if need_sl {
            let request = OrderRequest {
                symbol: self.settings.symbol.clone(),
                side,
                reduce_only: true,
                order_type: OrderType::StopMarket,
                size,
                price: None,
                trigger_price: Some(sl_price),
                attached_stop: None,
                leverage: self.settings.leverage,
            };
            if let Some(id) = self.submit_exit_with_retry(&request).await {
                tracing::info!("📌 SL placed @ {} ({})", sl_price, id);
                if let Some(trade) = core.trade.as_mut() {
                    trade.exits.sl = Some(id);
                }
            }
        }

        if let Some(trade) = core.trade.as_mut() {
            let complete = trade.exits.tp.is_some() && (trade.sl_attached || trade.exits.sl.is_some());
            if complete {
                trade.phase = TradePhase::ExitPlaced;
            } else {
                tracing::warn!(
                    "exit pair incomplete for {}, retrying next cycle",
                    trade.trade_id
                );
            }
        }
        self.persist(core).await;
    }

    async fn check_exits(&self, core: &mut Core) {
        // TP leg: the win path
        if let Some(tp_id) = core.trade.as_ref().and_then(|t| t.exits.tp.clone()) {
            match self.check_order_with_retry(&tp_id).await {
                FillCheck::Filled { avg_price } => {
                    self.handle_exit_fill(core, ExitKind::TakeProfit, avg_price).await;
                    return;
                }
                FillCheck::Canceled => {
                    // canceled outside this process; the position is still
                    // open and must not run unprotected on the profit side
                    tracing::warn!("TP {} canceled externally, re-staging", tp_id);
                    if let Some(trade) = core.trade.as_mut() {
                        trade.exits.tp = None;
                        trade.phase = TradePhase::EntryFilled;
                    }
                    self.persist(core).await;
                    return;
                }
                FillCheck::Pending { .. } => {}
            }
        }

        // SL leg: the loss path
        if let Some(sl_id) = core.trade.as_ref().and_then(|t| t.exits.sl.clone()) {
            match self.check_order_with_retry(&sl_id).await {
                FillCheck::Filled { avg_price } => {
                    self.handle_exit_fill(core, ExitKind::StopLoss, avg_price).await;
                    return;
                }
                FillCheck::Canceled => {
                    // the exposure already closed by some other means:
                    // neither win nor loss, just drain the remaining leg
                    tracing::warn!(
                        "SL {} canceled externally, clearing trade without result",
                        sl_id
                    );
                    if let Some(trade) = core.trade.as_mut() {
                        trade.exits.sl = None;
                        trade.closing = true;
                    }
                    self.drain_closing(core).await;
                    return;
                }
                FillCheck::Pending { .. } => {}
            }
        }

        // attached stop: the loss shows up as the position going flat while
        // the TP is still open
        let attached_watch = core
            .trade
            .as_ref()
            .map(|t| t.sl_attached && t.exits.sl.is_none() && t.exits.tp.is_some())
            .unwrap_or(false);
        if attached_watch {
            match self.gateway.open_position_size(&self.settings.symbol).await {
                Ok(open) if open.abs() <= f64::EPSILON => {
                    let sl_price = core.trade.as_ref().map(|t| t.sl_price).unwrap_or(0.0);
                    tracing::info!("position flat with TP outstanding: attached stop filled");
                    self.handle_exit_fill(core, ExitKind::StopLoss, sl_price).await;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("attached-stop position check failed: {}", e),
            }
        }
    }

    /// Record a terminal exit fill exactly once and enforce the pseudo-OCO
    /// invariant by canceling the sibling leg.
    async fn handle_exit_fill(&self, core: &mut Core, kind: ExitKind, exit_price: f64) {
        let Some(trade) = core.trade.as_mut() else {
            return;
        };

        // idempotency: take the leg out first, a duplicate notification
        // finds it gone
        let leg = match kind {
            ExitKind::TakeProfit => trade.exits.tp.take(),
            ExitKind::StopLoss => trade.exits.sl.take(),
        };
        let attached_loss = kind == ExitKind::StopLoss && trade.sl_attached;
        if leg.is_none() && !attached_loss {
            return;
        }
        let Some(entry_price) = trade.entry_price else {
            tracing::error!("exit fill without entry price on {}", trade.trade_id);
            return;
        };

        let pnl = (exit_price - entry_price) * trade.side.sign();
        let sibling = match kind {
            ExitKind::TakeProfit => trade.exits.sl.take(),
            ExitKind::StopLoss => trade.exits.tp.take(),
        };
        let result = TradeResult {
            trade_id: trade.trade_id.clone(),
            side: trade.side,
            exit_type: kind,
            exit_price,
            pnl,
            size: trade.size,
            sizing_level: trade.sizing_level,
            closed_at: Utc::now(),
        };
        let won = kind == ExitKind::TakeProfit;
        tracing::info!(
            "{} {} filled for {} @ {} pnl={:+.4}",
            if won { "🎯" } else { "🛑" },
            kind,
            result.trade_id,
            exit_price,
            pnl
        );
        let _ = self.events.send(result);

        core.balance += pnl;
        core.level = sizing::on_result(core.level, won);
        if !won && core.level >= self.settings.max_level {
            tracing::error!(
                "martingale ceiling reached (level {}), resetting ladder to base",
                core.level
            );
            core.level = 0;
        }
        let balance = core.balance;
        core.guard.on_trade_result(pnl, balance, Utc::now());

        match sibling {
            Some(sibling_id) => {
                // pseudo-OCO: the now-redundant leg must not stay live, or
                // it can fill against a position that no longer exists
                if self.cancel_with_retry(&sibling_id).await {
                    core.trade = None;
                } else if let Some(trade) = core.trade.as_mut() {
                    // not assumed canceled; keep draining until confirmed
                    match kind {
                        ExitKind::TakeProfit => trade.exits.sl = Some(sibling_id),
                        ExitKind::StopLoss => trade.exits.tp = Some(sibling_id),
                    }
                    trade.closing = true;
                }
            }
            None => core.trade = None,
        }
        self.persist(core).await;
    }

    /// Trade result is recorded but a sibling leg is still live; retry its
    /// cancel until the exchange confirms a terminal state.
    async fn drain_closing(&self, core: &mut Core) {
        let Some(sibling) = core
            .trade
            .as_ref()
            .and_then(|t| t.exits.tp.clone().or_else(|| t.exits.sl.clone()))
        else {
            core.trade = None;
            self.persist(core).await;
            return;
        };

        match self.check_order_with_retry(&sibling).await {
            FillCheck::Filled { avg_price } => {
                // the cancel race lost: a leg filled against a closed trade
                tracing::error!(
                    "sibling {} filled at {} after trade close - manual position review required",
                    sibling,
                    avg_price
                );
                core.trade = None;
                self.persist(core).await;
            }
            FillCheck::Canceled => {
                core.trade = None;
                self.persist(core).await;
            }
            FillCheck::Pending { .. } => {
                if self.cancel_with_retry(&sibling).await {
                    core.trade = None;
                    self.persist(core).await;
                } else {
                    tracing::warn!("sibling {} cancel still failing, retrying next cycle", sibling);
                }
            }
        }
    }
}

/// External fill push notification. The payload is informational only; the
/// idempotent reconcile pass does the authoritative status checks, so a
/// bogus or duplicate notice costs one extra pass and nothing else.
#[derive(Debug, Clone)]
pub struct FillNotice {
    pub order_id: String,
}

/// Drives reconciliation on a fixed interval, or immediately on an external
/// fill notification (whichever arrives first).
pub struct Reconciler {
    manager: Arc<LifecycleManager>,
    fills: mpsc::Receiver<FillNotice>,
    shutdown: Shutdown,
    interval: Duration,
    fills_closed: bool,
}

impl Reconciler {
    pub fn new(
        manager: Arc<LifecycleManager>,
        fills: mpsc::Receiver<FillNotice>,
        shutdown: Shutdown,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            fills,
            shutdown,
            interval,
            fills_closed: false,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            "reconciliation loop started ({}s interval)",
            self.interval.as_secs()
        );
        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = ticker.tick() => {}
                notice = self.fills.recv(), if !self.fills_closed => {
                    match notice {
                        Some(notice) => {
                            tracing::debug!("fill notification for {}", notice.order_id);
                        }
                        None => {
                            self.fills_closed = true;
                            continue;
                        }
                    }
                }
            }
            self.manager.reconcile_once().await;
        }
        tracing::info!("reconciliation loop stopped");
    }
}
