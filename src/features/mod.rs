// =============================================================================
// Feature Computer
// =============================================================================
//
// Pure, per-timeframe primitives over closed candles and the aligned
// OI/funding/taker series. Every sub-module returns `Option<T>` so callers
// must handle insufficient-data and numerical edge cases; `compute` bundles
// them into a single `FeatureSet` for the signal interpreter.

pub mod cvd;
pub mod funding;
pub mod oi;
pub mod stats;
pub mod structure;
pub mod trend;
pub mod volatility;
pub mod volume_profile;
pub mod vwap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TfThresholds;
use crate::errors::EngineError;
use crate::market_data::SeriesBundle;
use crate::types::{Exchange, Timeframe};

pub use cvd::CvdFeature;
pub use funding::FundingFeature;
pub use oi::{OiAlignment, OiFeature};
pub use structure::StructureFeature;
pub use trend::{CrossState, TrendFeature};
pub use volatility::VolatilityFeature;
pub use volume_profile::VolumeProfileFeature;
pub use vwap::{VwapFeature, VwapPosition};

/// Momentum look-back, in timeframe periods.
pub const MOMENTUM_PERIODS: usize = 24;

/// All analytical primitives for one `(exchange, timeframe)` cell.
///
/// Optional members are features that could not be computed from the
/// available data; the signal interpreter degrades them to WAIT verdicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSet {
    pub exchange: Exchange,
    pub timeframe: Timeframe,
    pub last_close: f64,
    /// Timestamp of the last closed candle, ms UTC.
    pub last_data_ms: i64,
    /// Close-over-close change of the last candle, percent.
    pub price_change_pct: f64,
    /// Price change over the momentum look-back, percent.
    pub momentum_pct: Option<f64>,
    pub trend: Option<TrendFeature>,
    pub volatility: Option<VolatilityFeature>,
    pub cvd: Option<CvdFeature>,
    pub oi: Option<OiFeature>,
    pub funding: Option<FundingFeature>,
    pub structure: Option<StructureFeature>,
    pub volume_profile: Option<VolumeProfileFeature>,
    pub vwap: Option<VwapFeature>,
    /// Resolution tag of the taker series (gate input).
    pub taker_resolution: String,
    /// True when any underlying series had gaps.
    pub partial: bool,
}

/// Compute the full feature set for one bundle.
///
/// Fails only when the candle series itself is below `min_candles`; every
/// other missing series degrades to `None` features.
pub fn compute(
    bundle: &SeriesBundle,
    thresholds: &TfThresholds,
    funding_z_extreme: f64,
    min_candles: usize,
) -> Result<FeatureSet, EngineError> {
    let candles = &bundle.candles;
    if candles.len() < min_candles.max(1) {
        return Err(EngineError::InsufficientData(format!(
            "{}/{}: {} candles, need {}",
            bundle.exchange,
            bundle.timeframe,
            candles.len(),
            min_candles
        )));
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let last_close = *closes.last().expect("non-empty by min_candles");
    let last_data_ms = candles.last().expect("non-empty").timestamp;

    let price_change_pct = if closes.len() >= 2 {
        let prev = closes[closes.len() - 2];
        if prev.abs() > f64::EPSILON {
            (last_close - prev) / prev * 100.0
        } else {
            0.0
        }
    } else {
        0.0
    };

    // Price change over the OI look-back, for divergence classification.
    let oi_price_change_pct = {
        let back = closes.len().saturating_sub(oi::OI_LOOKBACK + 1);
        let base = closes[back];
        if base.abs() > f64::EPSILON {
            (last_close - base) / base * 100.0
        } else {
            0.0
        }
    };

    let feature_set = FeatureSet {
        exchange: bundle.exchange,
        timeframe: bundle.timeframe,
        last_close,
        last_data_ms,
        price_change_pct,
        momentum_pct: trend::momentum_pct(&closes, MOMENTUM_PERIODS),
        trend: trend::compute(&closes, thresholds.noise_pct),
        volatility: volatility::compute(&closes, bundle.timeframe.interval_ms()),
        cvd: cvd::compute(
            &bundle.taker,
            thresholds.cvd.window_candles,
            thresholds.cvd.slope_window,
        ),
        oi: oi::compute(&bundle.oi, oi_price_change_pct, thresholds.oi_quiet_pct),
        funding: funding::compute(&bundle.funding, funding_z_extreme),
        structure: structure::compute(candles),
        volume_profile: volume_profile::compute(candles),
        vwap: vwap::compute(candles),
        taker_resolution: bundle.taker_resolution.clone(),
        partial: bundle.partial,
    };

    debug!(
        exchange = %bundle.exchange,
        tf = %bundle.timeframe,
        candles = candles.len(),
        trend = feature_set.trend.is_some(),
        cvd = feature_set.cvd.is_some(),
        oi = feature_set.oi.is_some(),
        "feature set computed"
    );

    Ok(feature_set)
}
