// =============================================================================
// VWAP — session-daily volume-weighted average price with percent bands
// =============================================================================
//
// The session starts at 00:00 UTC of the last candle's day. Bands are fixed
// percent offsets: +-1% inner, +-2% outer.

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

const MS_PER_DAY: i64 = 86_400_000;

/// Where price sits relative to the VWAP bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VwapPosition {
    AboveOuter,
    AboveInner,
    Inside,
    BelowInner,
    BelowOuter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VwapFeature {
    pub vwap: f64,
    pub upper_inner: f64,
    pub lower_inner: f64,
    pub upper_outer: f64,
    pub lower_outer: f64,
    pub position: VwapPosition,
    /// Candles that fell inside the session window.
    pub session_candles: usize,
}

/// Compute the session VWAP over `candles` (oldest first).
///
/// Returns `None` when the session window is empty or has no volume.
pub fn compute(candles: &[Candle]) -> Option<VwapFeature> {
    let last = candles.last()?;
    let session_start = last.timestamp.div_euclid(MS_PER_DAY) * MS_PER_DAY;

    let session: Vec<&Candle> = candles
        .iter()
        .filter(|c| c.timestamp >= session_start)
        .collect();
    if session.is_empty() {
        return None;
    }

    let mut pv = 0.0f64;
    let mut vol = 0.0f64;
    for c in &session {
        let typical = (c.high + c.low + c.close) / 3.0;
        pv += typical * c.volume;
        vol += c.volume;
    }
    if vol < f64::EPSILON {
        return None;
    }
    let vwap = pv / vol;

    let upper_inner = vwap * 1.01;
    let lower_inner = vwap * 0.99;
    let upper_outer = vwap * 1.02;
    let lower_outer = vwap * 0.98;

    let close = last.close;
    let position = if close > upper_outer {
        VwapPosition::AboveOuter
    } else if close > upper_inner {
        VwapPosition::AboveInner
    } else if close < lower_outer {
        VwapPosition::BelowOuter
    } else if close < lower_inner {
        VwapPosition::BelowInner
    } else {
        VwapPosition::Inside
    };

    Some(VwapFeature {
        vwap,
        upper_inner,
        lower_inner,
        upper_outer,
        lower_outer,
        position,
        session_candles: session.len(),
    })
}
