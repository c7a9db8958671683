// =============================================================================
// Trend — EMA stack, normalized slope, crossover state
// =============================================================================
//
// Direction comes from the EMA20 path over the last ten bars measured against
// the timeframe's noise threshold; strength is the least-squares slope of the
// closes normalized by their standard deviation, so it is comparable across
// symbols and timeframes.

use serde::{Deserialize, Serialize};

use crate::features::stats::{least_squares_slope, stddev};
use crate::regime::TrendDir;

/// EMA20 vs EMA50 relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossState {
    Bullish,
    Bearish,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendFeature {
    pub direction: TrendDir,
    /// Slope of closes normalized by their stddev, per bar.
    pub strength: f64,
    pub ema20: f64,
    pub ema50: f64,
    pub cross: CrossState,
    /// True when EMA20 crossed EMA50 within the last three bars.
    pub recent_cross: bool,
}

/// EMA series seeded with the SMA of the first `period` values.
pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }
    let multiplier = 2.0 / (period + 1) as f64;

    let sma: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    if !sma.is_finite() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(closes.len() - period + 1);
    result.push(sma);
    let mut prev = sma;
    for &close in &closes[period..] {
        let ema = close * multiplier + prev * (1.0 - multiplier);
        if !ema.is_finite() {
            break;
        }
        result.push(ema);
        prev = ema;
    }
    result
}

/// Simple moving average of the trailing `period` values.
pub fn calculate_sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    Some(closes[closes.len() - period..].iter().sum::<f64>() / period as f64)
}

/// Compute the trend feature over `closes` (oldest first).
///
/// `sideways_pct` is the timeframe's noise threshold: when the EMA20 moved
/// less than this (percent) over the last ten bars the direction is sideways.
///
/// Returns `None` with fewer than 50 closes (EMA50 floor).
pub fn compute(closes: &[f64], sideways_pct: f64) -> Option<TrendFeature> {
    if closes.len() < 50 {
        return None;
    }

    let ema20 = calculate_ema(closes, 20);
    let ema50 = calculate_ema(closes, 50);
    let e20 = *ema20.last()?;
    let e50 = *ema50.last()?;

    // Direction: EMA20 percent change over the last 10 bars vs noise.
    let look = 10.min(ema20.len() - 1);
    let e20_prev = ema20[ema20.len() - 1 - look];
    let ema_move_pct = if e20_prev.abs() > f64::EPSILON {
        (e20 - e20_prev) / e20_prev * 100.0
    } else {
        0.0
    };
    let direction = if ema_move_pct > sideways_pct {
        TrendDir::Up
    } else if ema_move_pct < -sideways_pct {
        TrendDir::Down
    } else {
        TrendDir::Sideways
    };

    // Strength: slope of the last 20 closes normalized by their stddev.
    let window = &closes[closes.len() - 20..];
    let slope = least_squares_slope(window)?;
    let sd = stddev(window)?;
    let strength = if sd > f64::EPSILON { slope / sd } else { 0.0 };

    let cross = if (e20 - e50).abs() / e50.abs().max(f64::EPSILON) < 1e-4 {
        CrossState::Flat
    } else if e20 > e50 {
        CrossState::Bullish
    } else {
        CrossState::Bearish
    };

    // A cross happened recently if the EMA20-EMA50 spread changed sign
    // within the last three bars.
    let recent_cross = {
        let n = ema20.len().min(ema50.len());
        let mut crossed = false;
        if n >= 4 {
            let spread =
                |i: usize| ema20[ema20.len() - n + i] - ema50[ema50.len() - n + i];
            let latest = spread(n - 1);
            for i in (n - 4)..(n - 1) {
                if spread(i) * latest < 0.0 {
                    crossed = true;
                    break;
                }
            }
        }
        crossed
    };

    Some(TrendFeature {
        direction,
        strength,
        ema20: e20,
        ema50: e50,
        cross,
        recent_cross,
    })
}

/// 24-period momentum: percent change of close over the look-back.
pub fn momentum_pct(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() <= period {
        return None;
    }
    let prev = closes[closes.len() - 1 - period];
    if prev.abs() < f64::EPSILON {
        return None;
    }
    Some((closes[closes.len() - 1] - prev) / prev * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ascending(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn ema_seeded_with_sma() {
        let closes = vec![2.0, 4.0, 6.0];
        let ema = calculate_ema(&closes, 3);
        assert_eq!(ema.len(), 1);
        assert!((ema[0] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn rising_series_trends_up() {
        let closes = ascending(100);
        let t = compute(&closes, 0.25).unwrap();
        assert_eq!(t.direction, TrendDir::Up);
        assert!(t.strength > 0.0);
        assert_eq!(t.cross, CrossState::Bullish);
    }

    #[test]
    fn falling_series_trends_down() {
        let closes: Vec<f64> = (0..100).map(|i| 200.0 - i as f64).collect();
        let t = compute(&closes, 0.25).unwrap();
        assert_eq!(t.direction, TrendDir::Down);
        assert!(t.strength < 0.0);
        assert_eq!(t.cross, CrossState::Bearish);
    }

    #[test]
    fn flat_series_is_sideways() {
        let closes = vec![100.0; 100];
        let t = compute(&closes, 0.25).unwrap();
        assert_eq!(t.direction, TrendDir::Sideways);
        assert!(t.strength.abs() < 1e-9);
    }

    #[test]
    fn insufficient_data_is_none() {
        assert!(compute(&ascending(30), 0.25).is_none());
    }

    #[test]
    fn momentum_known_value() {
        let mut closes = vec![100.0; 30];
        *closes.last_mut().unwrap() = 110.0;
        // 24 bars back the close was 100 -> +10%.
        assert!((momentum_pct(&closes, 24).unwrap() - 10.0).abs() < 1e-9);
    }
}
