// =============================================================================
// Volume Profile — POC and the 70% value area
// =============================================================================
//
// Candle volume is binned by typical price ((high + low + close) / 3). The
// point of control is the heaviest bin; the value area grows outward from it,
// always absorbing the heavier neighbour, until it holds 70% of total volume.

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

/// Number of price bins in the histogram.
const BINS: usize = 24;

/// Share of total volume inside the value area.
const VALUE_AREA_SHARE: f64 = 0.70;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeProfileFeature {
    /// Point of control: price level with the most traded volume.
    pub poc: f64,
    /// Value area high.
    pub vah: f64,
    /// Value area low.
    pub val: f64,
}

/// Build the profile over `candles` (oldest first).
///
/// Returns `None` when the window has no volume or no price range.
pub fn compute(candles: &[Candle]) -> Option<VolumeProfileFeature> {
    if candles.len() < 10 {
        return None;
    }

    let min_price = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let max_price = candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    if !(min_price.is_finite() && max_price.is_finite()) || max_price - min_price < f64::EPSILON {
        return None;
    }

    let bin_size = (max_price - min_price) / BINS as f64;
    let mut volumes = [0.0f64; BINS];
    let mut total = 0.0f64;

    for c in candles {
        let typical = (c.high + c.low + c.close) / 3.0;
        let mut idx = ((typical - min_price) / bin_size) as usize;
        if idx >= BINS {
            idx = BINS - 1;
        }
        volumes[idx] += c.volume;
        total += c.volume;
    }
    if total < f64::EPSILON {
        return None;
    }

    let poc_idx = volumes
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)?;

    // Expand around the POC toward the heavier side until 70% is covered.
    let mut lo = poc_idx;
    let mut hi = poc_idx;
    let mut covered = volumes[poc_idx];
    while covered < total * VALUE_AREA_SHARE && (lo > 0 || hi < BINS - 1) {
        let below = if lo > 0 { volumes[lo - 1] } else { -1.0 };
        let above = if hi < BINS - 1 { volumes[hi + 1] } else { -1.0 };
        if above > below {
            hi += 1;
            covered += volumes[hi];
        } else {
            lo -= 1;
            covered += volumes[lo];
        }
    }

    let bin_mid = |i: usize| min_price + (i as f64 + 0.5) * bin_size;
    Some(VolumeProfileFeature {
        poc: bin_mid(poc_idx),
        vah: min_price + (hi as f64 + 1.0) * bin_size,
        val: min_price + lo as f64 * bin_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, price: f64, volume: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: price,
            high: price + 1.0,
            low: price - 1.0,
            close: price,
            volume,
        }
    }

    #[test]
    fn poc_sits_at_heaviest_price() {
        // Heavy trade around 100, light wings at 90 and 110.
        let mut candles = Vec::new();
        for i in 0..10 {
            candles.push(candle(i, 100.0, 1_000.0));
        }
        for i in 10..15 {
            candles.push(candle(i, 90.0, 50.0));
        }
        for i in 15..20 {
            candles.push(candle(i, 110.0, 50.0));
        }
        let vp = compute(&candles).unwrap();
        assert!((vp.poc - 100.0).abs() < 2.0, "poc={}", vp.poc);
        assert!(vp.val <= vp.poc && vp.poc <= vp.vah);
    }

    #[test]
    fn value_area_holds_majority_of_volume() {
        let mut candles = Vec::new();
        for i in 0..30 {
            let price = 100.0 + (i % 5) as f64;
            candles.push(candle(i, price, 100.0));
        }
        let vp = compute(&candles).unwrap();
        assert!(vp.vah > vp.val);
    }

    #[test]
    fn zero_volume_is_none() {
        let candles: Vec<Candle> = (0..20).map(|i| candle(i, 100.0 + i as f64, 0.0)).collect();
        assert!(compute(&candles).is_none());
    }

    #[test]
    fn flat_price_is_none() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| Candle {
                timestamp: i,
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 10.0,
            })
            .collect();
        assert!(compute(&candles).is_none());
    }
}
