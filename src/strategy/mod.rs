// Signal generation: candle window + entry rules
pub mod consecutive;
pub mod window;

pub use consecutive::ConsecutiveCandles;
pub use window::CandleWindow;

use crate::models::{Candle, EntrySignal};

/// Base trait for signal sources feeding the lifecycle manager.
///
/// Implementations are pure over the candle window; the caller decides
/// whether a produced signal becomes an order.
pub trait SignalSource: Send + Sync {
    /// Inspect the (oldest-first) confirmed candle window and produce a
    /// trade intent, or None
    fn next_signal(&self, candles: &[Candle]) -> Option<EntrySignal>;

    fn name(&self) -> &str;

    /// Minimum confirmed candles required before signals are meaningful
    fn min_candles(&self) -> usize;
}
