use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::Side;

/// The TP/SL legs of the pseudo-OCO pair.
///
/// Ids are present only while the corresponding leg is outstanding; taking
/// an id out is what makes fill handling idempotent.
#[derive(Debug, Clone, Default)]
pub struct ExitPair {
    pub tp: Option<String>,
    pub sl: Option<String>,
}

impl ExitPair {
    pub fn is_empty(&self) -> bool {
        self.tp.is_none() && self.sl.is_none()
    }
}

/// Explicit state-machine tag for the active trade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradePhase {
    EntrySubmitted,
    EntryFilled,
    ExitPlaced,
}

/// One round trip (entry → exit), the single owner of all per-trade state.
/// At most one exists per tracked instrument.
#[derive(Debug, Clone)]
pub struct Trade {
    pub trade_id: String,
    pub side: Side,
    pub size: f64,
    /// Martingale level this entry was sized with
    pub sizing_level: u32,
    pub trigger_price: f64,
    pub sl_price: f64,
    /// Distance between market and trigger at submission; reference for the
    /// timeout-deferral heuristic
    pub submit_gap: f64,
    /// Stop-loss rides on the entry order instead of a staged leg
    pub sl_attached: bool,
    pub entry_order_id: Option<String>,
    pub entry_price: Option<f64>,
    pub exits: ExitPair,
    pub opened_at: DateTime<Utc>,
    pub phase: TradePhase,
    /// Result recorded, draining a sibling leg whose cancel has not
    /// succeeded yet
    pub closing: bool,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        now: DateTime<Utc>,
        side: Side,
        size: f64,
        sizing_level: u32,
        trigger_price: f64,
        sl_price: f64,
        submit_gap: f64,
        sl_attached: bool,
        entry_order_id: String,
    ) -> Self {
        Self {
            trade_id: Self::generate_id(now),
            side,
            size,
            sizing_level,
            trigger_price,
            sl_price,
            submit_gap,
            sl_attached,
            entry_order_id: Some(entry_order_id),
            entry_price: None,
            exits: ExitPair::default(),
            opened_at: now,
            phase: TradePhase::EntrySubmitted,
            closing: false,
        }
    }

    /// Stable across restarts until the position closes
    pub fn generate_id(now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("T{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trade_starts_submitted() {
        let trade = Trade::new(
            Utc::now(),
            Side::Long,
            2.0,
            1,
            100.0,
            99.85,
            0.0,
            false,
            "E1".to_string(),
        );
        assert_eq!(trade.phase, TradePhase::EntrySubmitted);
        assert_eq!(trade.entry_order_id.as_deref(), Some("E1"));
        assert!(trade.entry_price.is_none());
        assert!(trade.exits.is_empty());
        assert!(!trade.closing);
    }

    #[test]
    fn test_trade_id_format() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let id = Trade::generate_id(now);
        assert!(id.starts_with("T20231114_"));
        // date segment + 8 hex chars of entropy
        assert_eq!(id.len(), "T20231114_221320_".len() + 8);
    }

    #[test]
    fn test_exit_pair_empty() {
        let mut exits = ExitPair::default();
        assert!(exits.is_empty());
        exits.tp = Some("TP1".to_string());
        assert!(!exits.is_empty());
        exits.tp.take();
        exits.sl = Some("SL1".to_string());
        assert!(!exits.is_empty());
    }
}
