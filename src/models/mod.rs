use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a futures position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Signed multiplier for PnL math: +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// OHLCV candlestick data for the tracked instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Only confirmed (closed) bars feed the strategy
    pub confirmed: bool,
}

impl Candle {
    /// Direction of the bar body: +1 up, -1 down, 0 flat
    pub fn direction(&self) -> i8 {
        if self.close > self.open {
            1
        } else if self.close < self.open {
            -1
        } else {
            0
        }
    }
}

/// Directional trade intent produced by a signal source
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySignal {
    pub side: Side,
    pub trigger_price: f64,
}

/// Which exit leg closed the trade
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitKind {
    TakeProfit,
    StopLoss,
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitKind::TakeProfit => write!(f, "TP"),
            ExitKind::StopLoss => write!(f, "SL"),
        }
    }
}

/// Structured trade-result event emitted after a terminal exit fill.
///
/// Delivery is fire-and-forget over a broadcast channel; subscribers
/// (stats, notifications) must never block the reconciliation path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub trade_id: String,
    pub side: Side,
    pub exit_type: ExitKind,
    pub exit_price: f64,
    pub pnl: f64,
    pub size: f64,
    pub sizing_level: u32,
    pub closed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_sign() {
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.sign(), -1.0);
        assert_eq!(Side::Long.opposite(), Side::Short);
    }

    #[test]
    fn test_candle_direction() {
        let mut candle = Candle {
            open_time: Utc::now(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1000.0,
            confirmed: true,
        };
        assert_eq!(candle.direction(), 1);

        candle.close = 99.5;
        assert_eq!(candle.direction(), -1);

        candle.close = 100.0;
        assert_eq!(candle.direction(), 0);
    }
}
