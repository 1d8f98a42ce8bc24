use thiserror::Error;

/// Computed entry size fell below the exchange minimum step.
///
/// Callers must refuse to enter rather than submit an invalid order.
#[derive(Debug, Error, PartialEq)]
#[error("order size {computed} below exchange minimum step {min_step}")]
pub struct SizeTooSmall {
    pub computed: f64,
    pub min_step: f64,
}

/// Round a price down to the exchange tick
pub fn floor_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    (price / tick).floor() * tick
}

/// Round a quantity down to the exchange minimum step
pub fn floor_to_step(qty: f64, min_step: f64) -> f64 {
    if min_step <= 0.0 {
        return qty;
    }
    (qty / min_step).floor() * min_step
}

/// Entry size for the given martingale level: `base * multiplier^level`,
/// floored to the exchange step.
///
/// Returns `SizeTooSmall` when the floored size is below the minimum step,
/// so the caller refuses the entry instead of submitting it.
pub fn next_size(
    base: f64,
    multiplier: f64,
    level: u32,
    min_step: f64,
) -> Result<f64, SizeTooSmall> {
    let raw = base * multiplier.powi(level as i32);
    let size = floor_to_step(raw, min_step);
    if size < min_step {
        return Err(SizeTooSmall {
            computed: size,
            min_step,
        });
    }
    Ok(size)
}

/// Next martingale level from a trade outcome: a win resets to 0, a loss
/// advances by one. Uncapped here; the risk guard gates entries separately.
pub fn on_result(level: u32, won: bool) -> u32 {
    if won {
        0
    } else {
        level + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_size_at_level_zero() {
        assert_eq!(next_size(1.0, 2.0, 0, 0.001).unwrap(), 1.0);
        assert_eq!(next_size(5.0, 3.0, 0, 0.001).unwrap(), 5.0);
    }

    #[test]
    fn test_size_strictly_increasing_in_level() {
        let mut prev = 0.0;
        for level in 0..8 {
            let size = next_size(1.0, 2.0, level, 0.001).unwrap();
            assert!(size > prev, "level {} size {} not > {}", level, size, prev);
            prev = size;
        }
    }

    #[test]
    fn test_doubling_sequence() {
        // base=1, multiplier=2: 1, 2, 4
        assert_eq!(next_size(1.0, 2.0, 0, 0.001).unwrap(), 1.0);
        assert_eq!(next_size(1.0, 2.0, 1, 0.001).unwrap(), 2.0);
        assert_eq!(next_size(1.0, 2.0, 2, 0.001).unwrap(), 4.0);
    }

    #[test]
    fn test_floor_to_step() {
        assert_eq!(floor_to_step(1.2345, 0.01), 1.23);
        assert_eq!(floor_to_step(0.999, 0.1), 0.9);
        // degenerate step leaves the value untouched
        assert_eq!(floor_to_step(1.2345, 0.0), 1.2345);
    }

    #[test]
    fn test_floor_to_tick() {
        assert_eq!(floor_to_tick(100.057, 0.01), 100.05);
        assert_eq!(floor_to_tick(99.999, 0.5), 99.5);
    }

    #[test]
    fn test_refuses_below_min_step() {
        let err = next_size(0.0005, 2.0, 0, 0.001).unwrap_err();
        assert_eq!(err.min_step, 0.001);
    }

    #[test]
    fn test_win_resets_level() {
        assert_eq!(on_result(0, true), 0);
        assert_eq!(on_result(5, true), 0);
        assert_eq!(on_result(100, true), 0);
    }

    #[test]
    fn test_loss_increments_level() {
        assert_eq!(on_result(0, false), 1);
        assert_eq!(on_result(4, false), 5);
    }

    #[test]
    fn test_loss_loss_win_sequence() {
        // sizes 1, 2, 4 then back to 1 after the win
        let mut level = 0;
        assert_eq!(next_size(1.0, 2.0, level, 0.001).unwrap(), 1.0);
        level = on_result(level, false);
        assert_eq!(next_size(1.0, 2.0, level, 0.001).unwrap(), 2.0);
        level = on_result(level, false);
        assert_eq!(next_size(1.0, 2.0, level, 0.001).unwrap(), 4.0);
        level = on_result(level, true);
        assert_eq!(level, 0);
        assert_eq!(next_size(1.0, 2.0, level, 0.001).unwrap(), 1.0);
    }
}
