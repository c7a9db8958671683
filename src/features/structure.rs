// =============================================================================
// Structure — swing extrema, break of structure, support/resistance
// =============================================================================
//
// A swing high (low) is a local extremum within a +-k candle window. Break of
// structure is a close beyond the most recent opposite swing: above the last
// swing high = bullish BoS, below the last swing low = bearish BoS. Current
// support and resistance are simply the last swing low and high.

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::regime::StructureBreak;

/// Half-width of the swing detection window.
pub const SWING_WINDOW: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub timestamp: i64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureFeature {
    pub last_swing_high: Option<SwingPoint>,
    pub last_swing_low: Option<SwingPoint>,
    pub bos: StructureBreak,
    /// lastSwingLow, when known.
    pub support: Option<f64>,
    /// lastSwingHigh, when known.
    pub resistance: Option<f64>,
}

/// Detect swings and break-of-structure over `candles` (oldest first).
///
/// Returns `None` with fewer than `2 * SWING_WINDOW + 2` candles.
pub fn compute(candles: &[Candle]) -> Option<StructureFeature> {
    let k = SWING_WINDOW;
    if candles.len() < 2 * k + 2 {
        return None;
    }

    let mut last_high: Option<SwingPoint> = None;
    let mut last_low: Option<SwingPoint> = None;

    // The final k candles cannot be confirmed swings yet.
    for i in k..candles.len() - k {
        let c = &candles[i];
        let window = &candles[i - k..=i + k];
        let is_high = window.iter().all(|w| w.high <= c.high);
        let is_low = window.iter().all(|w| w.low >= c.low);
        if is_high {
            last_high = Some(SwingPoint {
                timestamp: c.timestamp,
                price: c.high,
            });
        }
        if is_low {
            last_low = Some(SwingPoint {
                timestamp: c.timestamp,
                price: c.low,
            });
        }
    }

    let last_close = candles.last()?.close;
    let bos = match (&last_high, &last_low) {
        (Some(high), _) if last_close > high.price => StructureBreak::Bullish,
        (_, Some(low)) if last_close < low.price => StructureBreak::Bearish,
        _ => StructureBreak::None,
    };

    let support = last_low.as_ref().map(|s| s.price);
    let resistance = last_high.as_ref().map(|s| s.price);

    Some(StructureFeature {
        last_swing_high: last_high,
        last_swing_low: last_low,
        bos,
        support,
        resistance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, low: f64, high: f64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: (low + high) / 2.0,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    /// Range-bound series with a clear swing high at 110 and low at 90.
    fn range_series() -> Vec<Candle> {
        let mut out = Vec::new();
        let shape = [
            (95.0, 100.0, 98.0),
            (97.0, 104.0, 102.0),
            (102.0, 110.0, 106.0), // swing high 110
            (99.0, 107.0, 101.0),
            (94.0, 102.0, 96.0),
            (90.0, 97.0, 93.0), // swing low 90
            (92.0, 99.0, 97.0),
            (95.0, 103.0, 100.0),
            (96.0, 104.0, 99.0),
            (95.0, 102.0, 98.0),
        ];
        for (i, (low, high, close)) in shape.iter().enumerate() {
            out.push(candle(i as i64 * 3_600_000, *low, *high, *close));
        }
        out
    }

    #[test]
    fn swings_detected_in_range() {
        let s = compute(&range_series()).unwrap();
        assert_eq!(s.resistance, Some(110.0));
        assert_eq!(s.support, Some(90.0));
        assert_eq!(s.bos, StructureBreak::None);
    }

    #[test]
    fn close_above_swing_high_is_bullish_bos() {
        let mut series = range_series();
        series.push(candle(10 * 3_600_000, 108.0, 113.0, 112.0));
        let s = compute(&series).unwrap();
        assert_eq!(s.bos, StructureBreak::Bullish);
    }

    #[test]
    fn close_below_swing_low_is_bearish_bos() {
        let mut series = range_series();
        series.push(candle(10 * 3_600_000, 85.0, 95.0, 88.0));
        let s = compute(&series).unwrap();
        assert_eq!(s.bos, StructureBreak::Bearish);
    }

    #[test]
    fn insufficient_data_is_none() {
        assert!(compute(&range_series()[..4]).is_none());
    }
}
