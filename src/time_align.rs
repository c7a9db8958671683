// =============================================================================
// Time Alignment — candle-boundary arithmetic and the no-lookahead rule
// =============================================================================
//
// The entire pipeline's correctness rests on one rule, enforced here: no
// candle opened at or after the as-of cutoff may influence a verdict. Every
// data fetch is clamped to `align_end_to_last_closed` and every returned
// series is checked with `validate_series`.

use tracing::warn;

use crate::errors::EngineError;
use crate::market_data::Candle;
use crate::types::Timeframe;

/// End-of-last-closed-candle boundary for `tf`, strictly <= `as_of_ms`.
///
/// Exact-boundary semantics: when `as_of_ms` falls exactly on a candle-open
/// boundary B, B is returned — the candle `[B - interval, B)` has just closed.
pub fn align_end_to_last_closed(tf: Timeframe, as_of_ms: i64) -> i64 {
    let step = tf.interval_ms();
    as_of_ms.div_euclid(step) * step
}

/// Floor of `t` to the interval boundary in UTC.
pub fn align_start_to_boundary(tf: Timeframe, t: i64) -> i64 {
    let step = tf.interval_ms();
    t.div_euclid(step) * step
}

/// Outcome of validating a fetched candle series against an as-of cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesCheck {
    /// True when the series has interior gaps larger than one interval.
    pub partial: bool,
}

/// Validate a candle series for use at cutoff `end_ms`:
///
/// * every candle must be fully closed at the cutoff
///   (`timestamp + interval <= end_ms`) — violation is a [`EngineError::Lookahead`];
/// * timestamps must be strictly increasing — violation is fatal;
/// * gaps larger than one interval mark the series as partial (not an error).
pub fn validate_series(
    candles: &[Candle],
    tf: Timeframe,
    end_ms: i64,
) -> Result<SeriesCheck, EngineError> {
    let step = tf.interval_ms();
    let mut partial = false;

    for (i, c) in candles.iter().enumerate() {
        if c.timestamp + step > end_ms {
            return Err(EngineError::Lookahead(format!(
                "candle open={} closes at {} which is after cutoff {} ({})",
                c.timestamp,
                c.timestamp + step,
                end_ms,
                tf
            )));
        }
        if i > 0 {
            let prev = candles[i - 1].timestamp;
            if c.timestamp <= prev {
                return Err(EngineError::Fatal(format!(
                    "candle series not strictly increasing at index {i}: {prev} -> {}",
                    c.timestamp
                )));
            }
            if c.timestamp - prev > step {
                partial = true;
            }
        }
    }

    if partial {
        warn!(tf = %tf, end_ms, "candle series has gaps — marked partial");
    }

    Ok(SeriesCheck { partial })
}

/// Fail with [`EngineError::InsufficientData`] unless at least `min` candles
/// are present. The caller has already clamped the series to the cutoff.
pub fn require_min(candles: &[Candle], min: usize, what: &str) -> Result<(), EngineError> {
    if candles.len() < min {
        return Err(EngineError::InsufficientData(format!(
            "{what}: have {} candles, need {min}",
            candles.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64) -> Candle {
        Candle {
            timestamp: ts,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        }
    }

    #[test]
    fn align_end_mid_candle() {
        // 14:47 UTC with 4h candles -> 12:00 boundary.
        let t_1447 = 1_765_810_020_000; // 2025-12-15T14:47:00Z
        let t_1200 = 1_765_800_000_000; // 2025-12-15T12:00:00Z
        assert_eq!(align_end_to_last_closed(Timeframe::H4, t_1447), t_1200);
    }

    #[test]
    fn align_end_exact_boundary_returns_boundary() {
        let boundary = 14_400_000 * 1000; // any exact 4h multiple
        assert_eq!(align_end_to_last_closed(Timeframe::H4, boundary), boundary);
    }

    #[test]
    fn align_start_floors() {
        assert_eq!(align_start_to_boundary(Timeframe::H1, 3_600_001), 3_600_000);
        assert_eq!(align_start_to_boundary(Timeframe::H1, 3_599_999), 0);
    }

    #[test]
    fn validate_rejects_lookahead() {
        let end = 7_200_000; // 2h cutoff
        // A 1h candle opening at the cutoff closes after it.
        let series = vec![candle(3_600_000), candle(7_200_000)];
        let err = validate_series(&series, Timeframe::H1, end).unwrap_err();
        assert_eq!(err.kind(), "Lookahead");
    }

    #[test]
    fn validate_accepts_candle_closing_exactly_at_cutoff() {
        let end = 7_200_000;
        let series = vec![candle(0), candle(3_600_000)];
        let check = validate_series(&series, Timeframe::H1, end).unwrap();
        assert!(!check.partial);
    }

    #[test]
    fn validate_marks_gaps_partial() {
        let end = 4 * 3_600_000;
        let series = vec![candle(0), candle(2 * 3_600_000)];
        let check = validate_series(&series, Timeframe::H1, end).unwrap();
        assert!(check.partial);
    }

    #[test]
    fn validate_rejects_unordered() {
        let end = 86_400_000;
        let series = vec![candle(3_600_000), candle(3_600_000)];
        assert!(validate_series(&series, Timeframe::H1, end).is_err());
    }

    #[test]
    fn require_min_insufficient() {
        let series = vec![candle(0)];
        let err = require_min(&series, 2, "trend").unwrap_err();
        assert_eq!(err.kind(), "InsufficientData");
    }
}
