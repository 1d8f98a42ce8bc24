use crate::models::{Candle, EntrySignal, Side};
use crate::strategy::SignalSource;

/// Entry rule: N consecutive same-direction confirmed candles trigger an
/// entry in that direction at the latest close.
///
/// With `direction_match` enabled, the bar preceding the run must also agree
/// in direction, as extra confirmation against one-off spikes.
pub struct ConsecutiveCandles {
    count: usize,
    direction_match: bool,
}

impl ConsecutiveCandles {
    pub fn new(count: usize, direction_match: bool) -> Self {
        Self {
            count: count.max(1),
            direction_match,
        }
    }
}

impl SignalSource for ConsecutiveCandles {
    fn next_signal(&self, candles: &[Candle]) -> Option<EntrySignal> {
        if candles.len() < self.min_candles() {
            return None;
        }

        let run = &candles[candles.len() - self.count..];
        let dir = run[0].direction();
        if dir == 0 || run.iter().any(|c| c.direction() != dir) {
            return None;
        }

        if self.direction_match {
            let prior = &candles[candles.len() - self.count - 1];
            if prior.direction() != dir {
                return None;
            }
        }

        let side = if dir > 0 { Side::Long } else { Side::Short };
        let trigger_price = run[run.len() - 1].close;
        Some(EntrySignal {
            side,
            trigger_price,
        })
    }

    fn name(&self) -> &str {
        "consecutive-candles"
    }

    fn min_candles(&self) -> usize {
        if self.direction_match {
            self.count + 1
        } else {
            self.count
        }
    }
}
