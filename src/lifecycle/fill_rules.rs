//! Pure decision rules for entry-order timeout and partial-fill handling.
//!
//! Kept free of I/O so every branch of the cancel decision is directly
//! testable.

use chrono::{DateTime, Utc};

/// Partially filled below the acceptance threshold.
///
/// A partial fill keeps a timed-out entry alive: canceling it would leave a
/// stub position whose exits were never placed.
pub fn is_partial_filled(filled_qty: f64, amount: f64, threshold: f64) -> bool {
    if amount <= 0.0 {
        return false;
    }
    let ratio = filled_qty / amount;
    ratio > 0.0 && ratio < threshold
}

/// Entry order has been outstanding longer than the timeout.
/// A timeout of 0 disables expiry.
pub fn is_entry_timeout(opened_at: DateTime<Utc>, now: DateTime<Utc>, timeout_secs: u64) -> bool {
    if timeout_secs == 0 {
        return false;
    }
    (now - opened_at).num_seconds() > timeout_secs as i64
}

/// Defer a timeout while price is still converging on the trigger.
///
/// The remaining gap to the trigger is compared against the gap at
/// submission; once it has shrunk below `defer_ratio` of the original, the
/// order is likely about to fill and canceling would race the fill.
pub fn timeout_deferred(market: f64, trigger: f64, submit_gap: f64, defer_ratio: f64) -> bool {
    if submit_gap <= 0.0 || defer_ratio <= 0.0 {
        return false;
    }
    let remaining = (market - trigger).abs();
    remaining <= submit_gap * defer_ratio
}

/// Full cancel decision for an outstanding entry order
#[allow(clippy::too_many_arguments)]
pub fn should_cancel_entry(
    opened_at: DateTime<Utc>,
    now: DateTime<Utc>,
    timeout_secs: u64,
    filled_qty: f64,
    amount: f64,
    partial_threshold: f64,
    market: Option<f64>,
    trigger: f64,
    submit_gap: f64,
    defer_ratio: f64,
) -> bool {
    if !is_entry_timeout(opened_at, now, timeout_secs) {
        return false;
    }
    if is_partial_filled(filled_qty, amount, partial_threshold) {
        tracing::info!("entry partially filled, keeping order alive past timeout");
        return false;
    }
    if let Some(market) = market {
        if timeout_deferred(market, trigger, submit_gap, defer_ratio) {
            tracing::info!("entry timeout deferred, price converging on trigger");
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_partial_fill_detection() {
        assert!(is_partial_filled(0.5, 2.0, 0.95)); // 25%
        assert!(!is_partial_filled(0.0, 2.0, 0.95)); // nothing filled
        assert!(!is_partial_filled(1.95, 2.0, 0.95)); // 97.5%, effectively full
        assert!(!is_partial_filled(1.0, 0.0, 0.95)); // degenerate amount
    }

    #[test]
    fn test_entry_timeout() {
        let opened = t0();
        assert!(!is_entry_timeout(opened, opened + Duration::seconds(59), 60));
        assert!(!is_entry_timeout(opened, opened + Duration::seconds(60), 60));
        assert!(is_entry_timeout(opened, opened + Duration::seconds(61), 60));
        // 0 disables
        assert!(!is_entry_timeout(opened, opened + Duration::seconds(9999), 0));
    }

    #[test]
    fn test_deferral_when_converging() {
        // gap at submission was 1.0; price moved 80% of the way in
        assert!(timeout_deferred(100.2, 100.0, 1.0, 0.5));
        // price stationary: full gap remains
        assert!(!timeout_deferred(101.0, 100.0, 1.0, 0.5));
        // no reference gap (market entry at trigger): never defer
        assert!(!timeout_deferred(100.2, 100.0, 0.0, 0.5));
    }

    #[test]
    fn test_cancel_after_timeout_with_stationary_price() {
        let opened = t0();
        let now = opened + Duration::seconds(61);
        assert!(should_cancel_entry(
            opened, now, 60, 0.0, 2.0, 0.95,
            Some(101.0), 100.0, 1.0, 0.5,
        ));
    }

    #[test]
    fn test_timeout_deferred_when_price_converged() {
        let opened = t0();
        let now = opened + Duration::seconds(61);
        // 80% of the way to the trigger: remaining gap 0.2 of 1.0
        assert!(!should_cancel_entry(
            opened, now, 60, 0.0, 2.0, 0.95,
            Some(100.2), 100.0, 1.0, 0.5,
        ));
    }

    #[test]
    fn test_no_cancel_before_timeout() {
        let opened = t0();
        let now = opened + Duration::seconds(30);
        assert!(!should_cancel_entry(
            opened, now, 60, 0.0, 2.0, 0.95,
            Some(105.0), 100.0, 1.0, 0.5,
        ));
    }

    #[test]
    fn test_partial_fill_blocks_cancel() {
        let opened = t0();
        let now = opened + Duration::seconds(120);
        assert!(!should_cancel_entry(
            opened, now, 60, 0.5, 2.0, 0.95,
            Some(105.0), 100.0, 1.0, 0.5,
        ));
    }

    #[test]
    fn test_unknown_market_price_cancels_on_timeout() {
        let opened = t0();
        let now = opened + Duration::seconds(61);
        assert!(should_cancel_entry(
            opened, now, 60, 0.0, 2.0, 0.95, None, 100.0, 1.0, 0.5,
        ));
    }
}
