// =============================================================================
// Open Interest — participation trend and price/OI divergence
// =============================================================================
//
// OI rising with a price move means new money is backing the move (aligned).
// A move on falling OI is running on position closes only, which reads as a
// divergence against the move: rally on falling OI = bearish divergence,
// decline on falling OI = bullish divergence.

use serde::{Deserialize, Serialize};

use crate::market_data::OiPoint;
use crate::regime::OiTrend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OiAlignment {
    BullishDivergence,
    BearishDivergence,
    Aligned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OiFeature {
    pub last: f64,
    /// Percent change over the 24-period look-back.
    pub change_pct: f64,
    pub trend: OiTrend,
    pub alignment: OiAlignment,
}

/// Look-back for the OI change, in timeframe periods.
pub const OI_LOOKBACK: usize = 24;

/// Compute the OI feature. `price_change_pct` is the price change over the
/// same look-back; `quiet_pct` is the timeframe's OI-quiet threshold.
pub fn compute(oi: &[OiPoint], price_change_pct: f64, quiet_pct: f64) -> Option<OiFeature> {
    if oi.len() < 2 {
        return None;
    }
    let last = oi.last()?.value;
    let back = oi.len().saturating_sub(OI_LOOKBACK + 1);
    let base = oi[back].value;
    if base.abs() < f64::EPSILON {
        return None;
    }
    let change_pct = (last - base) / base * 100.0;

    let trend = if change_pct > quiet_pct {
        OiTrend::Rising
    } else if change_pct < -quiet_pct {
        OiTrend::Falling
    } else {
        OiTrend::Flat
    };

    let alignment = match trend {
        OiTrend::Falling if price_change_pct > 0.0 => OiAlignment::BearishDivergence,
        OiTrend::Falling if price_change_pct < 0.0 => OiAlignment::BullishDivergence,
        _ => OiAlignment::Aligned,
    };

    Some(OiFeature {
        last,
        change_pct,
        trend,
        alignment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Vec<OiPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| OiPoint {
                timestamp: i as i64 * 3_600_000,
                value: v,
            })
            .collect()
    }

    #[test]
    fn rising_oi_with_rally_is_aligned() {
        let oi = series(&(0..30).map(|i| 1_000.0 + 20.0 * i as f64).collect::<Vec<_>>());
        let f = compute(&oi, 2.0, 0.8).unwrap();
        assert_eq!(f.trend, OiTrend::Rising);
        assert_eq!(f.alignment, OiAlignment::Aligned);
        assert!(f.change_pct > 0.8);
    }

    #[test]
    fn rally_on_falling_oi_is_bearish_divergence() {
        let oi = series(&(0..30).map(|i| 2_000.0 - 15.0 * i as f64).collect::<Vec<_>>());
        let f = compute(&oi, 1.5, 0.8).unwrap();
        assert_eq!(f.trend, OiTrend::Falling);
        assert_eq!(f.alignment, OiAlignment::BearishDivergence);
    }

    #[test]
    fn decline_on_falling_oi_is_bullish_divergence() {
        let oi = series(&(0..30).map(|i| 2_000.0 - 15.0 * i as f64).collect::<Vec<_>>());
        let f = compute(&oi, -1.5, 0.8).unwrap();
        assert_eq!(f.alignment, OiAlignment::BullishDivergence);
    }

    #[test]
    fn small_changes_are_flat() {
        let oi = series(&vec![1_000.0; 30]);
        let f = compute(&oi, 0.5, 0.8).unwrap();
        assert_eq!(f.trend, OiTrend::Flat);
        assert_eq!(f.alignment, OiAlignment::Aligned);
    }
}
