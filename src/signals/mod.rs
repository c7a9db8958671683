// =============================================================================
// Signals Module
// =============================================================================
//
// Maps per-timeframe feature bundles to weighted signal verdicts:
// - `interpreter` — one verdict per configured signal family
// - `reliability` — gates that zero-weight unreliable signals

pub mod interpreter;
pub mod reliability;

pub use interpreter::{interpret_timeframe, resolve_direction};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Bias, Timeframe};

/// Verdict of a single signal family on one timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalVerdict {
    pub name: String,
    pub bias: Bias,
    /// Confidence in [0, 10].
    pub confidence: f64,
    /// Effective (renormalized) weight; 0 when gated.
    pub weight: f64,
    pub reliable: bool,
    pub reasoning: String,
}

/// All verdicts for one timeframe plus the aggregated directional read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeVerdicts {
    pub timeframe: Timeframe,
    pub bias: Bias,
    pub confidence: f64,
    /// Weighted LONG score on the unit weight vector.
    pub long_score: f64,
    pub short_score: f64,
    pub wait_score: f64,
    pub verdicts: Vec<SignalVerdict>,
    /// Renormalized weights; always sums to 1 within tolerance.
    pub effective_weights: BTreeMap<String, f64>,
    /// Signals whose reliability gate fired.
    pub gated_off: usize,
    /// True when the staleness gate fired (soft or hard).
    pub stale: bool,
    pub warnings: Vec<String>,
}

impl TimeframeVerdicts {
    /// Reliability flags per signal, for the state's reliability summary.
    pub fn reliable_flags(&self) -> BTreeMap<String, bool> {
        self.verdicts
            .iter()
            .map(|v| (v.name.clone(), v.reliable))
            .collect()
    }
}
