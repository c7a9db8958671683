// =============================================================================
// Reliability Gates — zero-weight unreliable signals before aggregation
// =============================================================================
//
// A gated signal contributes weight 0 and bias WAIT; the remaining weights
// are renormalized so effective weights always sum to 1. Gates never throw:
// degraded data flows through as warnings on the state.

use std::collections::BTreeMap;

use crate::config::CvdParams;
use crate::features::CvdFeature;
use crate::types::Timeframe;

/// Outcome of a reliability gate.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub reliable: bool,
    /// Multiplier on the signal's confidence (staleness soft gate).
    pub confidence_mult: f64,
    /// When false the signal's weight is zeroed.
    pub keep_weight: bool,
    pub warning: Option<String>,
}

impl GateOutcome {
    pub fn pass() -> Self {
        Self {
            reliable: true,
            confidence_mult: 1.0,
            keep_weight: true,
            warning: None,
        }
    }

    fn fail(warning: String) -> Self {
        Self {
            reliable: false,
            confidence_mult: 1.0,
            keep_weight: false,
            warning: Some(warning),
        }
    }
}

/// Longest tolerated run of zero-volume candles in the CVD window.
const MAX_ZERO_RUN: usize = 3;

/// CVD gate: enough candles, matching resolution, no long zero-volume runs.
pub fn cvd_gate(
    feature: Option<&CvdFeature>,
    taker_resolution: &str,
    tf: Timeframe,
    params: &CvdParams,
) -> GateOutcome {
    let feature = match feature {
        Some(f) => f,
        None => {
            return GateOutcome::fail(format!("{tf}: CVD series missing — signal gated off"));
        }
    };

    let required = (params.min_reliable_pct * params.window_candles as f64).ceil() as usize;
    if feature.actual_candles < required {
        return GateOutcome::fail(format!(
            "{tf}: CVD has {}/{} candles (need {required}) — signal gated off",
            feature.actual_candles, feature.expected_candles
        ));
    }

    if taker_resolution != tf.cvd_resolution() {
        return GateOutcome::fail(format!(
            "{tf}: CVD resolution '{taker_resolution}' does not match expected '{}' — signal gated off",
            tf.cvd_resolution()
        ));
    }

    if feature.max_zero_run > MAX_ZERO_RUN {
        return GateOutcome::fail(format!(
            "{tf}: {} consecutive zero-volume CVD candles (max {MAX_ZERO_RUN}) — signal gated off",
            feature.max_zero_run
        ));
    }

    GateOutcome::pass()
}

/// Staleness gate on the whole timeframe: age beyond the last candle close.
///
/// Age > 2x timeframe soft-gates (confidence x 0.8); > 4x zero-weights every
/// signal on the timeframe.
pub fn staleness_gate(
    last_data_ms: i64,
    as_of_ms: i64,
    tf: Timeframe,
    staleness_multiplier: f64,
) -> GateOutcome {
    let interval = tf.interval_ms();
    let close_ms = last_data_ms + interval;
    let age = as_of_ms.saturating_sub(close_ms).max(0);

    let soft = (staleness_multiplier * interval as f64) as i64;
    let hard = (2.0 * staleness_multiplier * interval as f64) as i64;

    if age > hard {
        GateOutcome {
            reliable: false,
            confidence_mult: 1.0,
            keep_weight: false,
            warning: Some(format!(
                "{tf}: data {age} ms stale (> {hard} ms) — timeframe zero-weighted"
            )),
        }
    } else if age > soft {
        GateOutcome {
            reliable: true,
            confidence_mult: 0.8,
            keep_weight: true,
            warning: Some(format!("{tf}: data {age} ms stale — confidence reduced")),
        }
    } else {
        GateOutcome::pass()
    }
}

/// Renormalize `weights` in place so non-zero entries sum to 1. When every
/// weight is zero, falls back to uniform weights so a produced state always
/// carries a unit weight vector.
pub fn renormalize(weights: &mut BTreeMap<String, f64>) {
    let sum: f64 = weights.values().sum();
    if sum > f64::EPSILON {
        for w in weights.values_mut() {
            *w /= sum;
        }
    } else if !weights.is_empty() {
        let uniform = 1.0 / weights.len() as f64;
        for w in weights.values_mut() {
            *w = uniform;
        }
    }
}
