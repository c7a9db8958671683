// =============================================================================
// CVD — normalized per-candle volume delta, slope, and noise floor
// =============================================================================
//
// Each candle's delta is (buy - sell) / (buy + sell), which keeps the series
// comparable across symbols and volume regimes. The signal is the
// least-squares fitted change across the last `slope_window` deltas (same
// units as the deltas themselves); it only counts as strong when it clears
// the noise floor (stddev of the full window x 1.5).

use serde::{Deserialize, Serialize};

use crate::features::stats::{least_squares_slope, stddev};
use crate::market_data::TakerVolume;
use crate::regime::SlopeSign;

/// Noise-floor multiplier over the window stddev.
const NOISE_FLOOR_MULT: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvdFeature {
    /// Normalized deltas, oldest first, at most `window` entries.
    pub series: Vec<f64>,
    /// Least-squares fitted change across the last `slope_window` deltas.
    pub slope: f64,
    /// stddev(series) x 1.5.
    pub noise_floor: f64,
    /// |slope| > noise_floor.
    pub strong: bool,
    pub direction: SlopeSign,
    /// Candles actually present vs the configured window.
    pub actual_candles: usize,
    pub expected_candles: usize,
    /// Longest run of consecutive zero-volume candles.
    pub max_zero_run: usize,
}

/// Normalized delta of a single taker-volume candle.
pub fn normalized_delta(t: &TakerVolume) -> f64 {
    let total = t.buy_usd + t.sell_usd;
    if total < f64::EPSILON {
        return 0.0;
    }
    (t.buy_usd - t.sell_usd) / total
}

/// Compute the CVD feature over the trailing `window` taker candles.
///
/// Returns `None` when fewer than `slope_window` candles are available —
/// below that not even the slope is defined.
pub fn compute(taker: &[TakerVolume], window: usize, slope_window: usize) -> Option<CvdFeature> {
    if taker.len() < slope_window || slope_window < 2 {
        return None;
    }

    let tail_start = taker.len().saturating_sub(window);
    let tail = &taker[tail_start..];

    let series: Vec<f64> = tail.iter().map(normalized_delta).collect();

    let mut max_zero_run = 0usize;
    let mut run = 0usize;
    for t in tail {
        if t.buy_usd + t.sell_usd < f64::EPSILON {
            run += 1;
            max_zero_run = max_zero_run.max(run);
        } else {
            run = 0;
        }
    }

    let slope_tail = &series[series.len() - slope_window.min(series.len())..];
    // Project the per-candle regression slope across the window so it lives
    // in delta units and is comparable against the noise floor.
    let slope = least_squares_slope(slope_tail)? * (slope_tail.len() as f64 - 1.0);
    let noise_floor = stddev(&series)? * NOISE_FLOOR_MULT;
    let strong = slope.abs() > noise_floor;

    let direction = if !strong {
        SlopeSign::Flat
    } else if slope > 0.0 {
        SlopeSign::Positive
    } else {
        SlopeSign::Negative
    };

    Some(CvdFeature {
        series,
        slope,
        noise_floor,
        strong,
        direction,
        actual_candles: tail.len(),
        expected_candles: window,
        max_zero_run,
    })
}
