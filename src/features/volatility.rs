// =============================================================================
// Volatility — realized volatility and maximum drawdown
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::features::stats::stddev;

const MS_PER_YEAR: f64 = 365.25 * 24.0 * 3_600_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityFeature {
    /// Annualized standard deviation of log returns over the window.
    pub realized: f64,
    /// Largest peak-to-trough decline over the window, in percent (>= 0).
    pub max_drawdown_pct: f64,
}

/// Compute realized volatility and max drawdown over `closes` (oldest first).
///
/// `interval_ms` scales the per-bar stddev to an annualized figure.
pub fn compute(closes: &[f64], interval_ms: i64) -> Option<VolatilityFeature> {
    if closes.len() < 3 {
        return None;
    }

    let mut log_returns = Vec::with_capacity(closes.len() - 1);
    for pair in closes.windows(2) {
        if pair[0] > 0.0 && pair[1] > 0.0 {
            log_returns.push((pair[1] / pair[0]).ln());
        }
    }
    if log_returns.len() < 2 {
        return None;
    }

    let per_bar = stddev(&log_returns)?;
    let bars_per_year = MS_PER_YEAR / interval_ms as f64;
    let realized = per_bar * bars_per_year.sqrt();

    let mut peak = closes[0];
    let mut max_dd = 0.0f64;
    for &close in closes {
        if close > peak {
            peak = close;
        }
        if peak > 0.0 {
            let dd = (peak - close) / peak * 100.0;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    Some(VolatilityFeature {
        realized,
        max_drawdown_pct: max_dd,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_series_has_zero_vol_and_drawdown() {
        let closes = vec![100.0; 50];
        let v = compute(&closes, 3_600_000).unwrap();
        assert!(v.realized.abs() < 1e-12);
        assert!(v.max_drawdown_pct.abs() < 1e-12);
    }

    #[test]
    fn drawdown_measured_from_peak() {
        let closes = vec![100.0, 110.0, 99.0, 104.0, 121.0, 100.0];
        let v = compute(&closes, 3_600_000).unwrap();
        // Worst decline: 121 -> 100 = ~17.36%.
        assert!((v.max_drawdown_pct - (21.0 / 121.0 * 100.0)).abs() < 1e-9);
    }

    #[test]
    fn shorter_interval_annualizes_higher() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 * (1.0 + 0.01 * ((i % 2) as f64 - 0.5)))
            .collect();
        let hourly = compute(&closes, 3_600_000).unwrap();
        let daily = compute(&closes, 86_400_000).unwrap();
        assert!(hourly.realized > daily.realized);
    }

    #[test]
    fn insufficient_data_is_none() {
        assert!(compute(&[100.0, 101.0], 3_600_000).is_none());
    }
}
