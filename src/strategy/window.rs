use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::models::Candle;

/// Rolling window of confirmed candles for the tracked instrument.
///
/// Deduplicates by open timestamp so a feed that re-delivers the same
/// confirmed bar (polling faster than the bar interval) does not double it.
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    max_candles: usize,
    last_open_time: Option<DateTime<Utc>>,
}

impl CandleWindow {
    pub fn new(max_candles: usize) -> Self {
        Self {
            candles: VecDeque::new(),
            max_candles,
            last_open_time: None,
        }
    }

    /// Add a confirmed candle. Returns false for duplicates and
    /// unconfirmed bars, which are dropped.
    pub fn push(&mut self, candle: Candle) -> bool {
        if !candle.confirmed {
            return false;
        }
        if self.last_open_time == Some(candle.open_time) {
            tracing::debug!("duplicate bar at {} - waiting for next", candle.open_time);
            return false;
        }

        self.last_open_time = Some(candle.open_time);
        self.candles.push_back(candle);
        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Oldest-first view of the window
    pub fn as_slice(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candle_at(minutes: i64, close: f64) -> Candle {
        Candle {
            open_time: DateTime::from_timestamp(1_700_000_000 + minutes * 60, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
            confirmed: true,
        }
    }

    #[test]
    fn test_push_and_order() {
        let mut w = CandleWindow::new(10);
        assert!(w.push(candle_at(0, 100.0)));
        assert!(w.push(candle_at(1, 101.0)));

        let slice = w.as_slice();
        assert_eq!(slice.len(), 2);
        assert_eq!(slice[0].close, 100.0);
        assert_eq!(slice[1].close, 101.0);
    }

    #[test]
    fn test_duplicate_bar_rejected() {
        let mut w = CandleWindow::new(10);
        assert!(w.push(candle_at(0, 100.0)));
        assert!(!w.push(candle_at(0, 100.0)));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_unconfirmed_bar_rejected() {
        let mut w = CandleWindow::new(10);
        let mut candle = candle_at(0, 100.0);
        candle.confirmed = false;
        assert!(!w.push(candle));
        assert!(w.is_empty());
    }

    #[test]
    fn test_window_bounded() {
        let mut w = CandleWindow::new(3);
        for i in 0..6 {
            w.push(candle_at(i, 100.0 + i as f64));
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.as_slice()[0].close, 103.0);
        assert_eq!(w.latest().unwrap().close, 105.0);
    }

    #[test]
    fn test_latest() {
        let mut w = CandleWindow::new(10);
        assert!(w.latest().is_none());
        w.push(candle_at(0, 100.0));
        let newer = Candle {
            open_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(1),
            ..candle_at(0, 102.0)
        };
        w.push(newer);
        assert_eq!(w.latest().unwrap().close, 102.0);
    }
}
