// =============================================================================
// Absorption Module
// =============================================================================
//
// Two-phase institutional absorption tracking. Phase 1 opens an event when
// strong CVD meets a flat or opposite price response at a meaningful level;
// Phase 2 resolves it candles later as TRAP / ACCUMULATION / DISTRIBUTION,
// or expires it. While an event is DETECTING the market state only carries a
// warning — bias and confidence are untouched.

pub mod engine;
pub mod store;

pub use engine::AbsorptionEngine;
pub use store::{AbsorptionStore, DetectionOutcome};

use serde::{Deserialize, Serialize};

use crate::types::{Bias, Timeframe};

/// Net taker flow direction that is being absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CvdDirection {
    Buying,
    Selling,
}

impl CvdDirection {
    /// Bias of continued absorption in this direction succeeding.
    pub fn continuation_bias(self) -> Bias {
        match self {
            Self::Buying => Bias::Long,
            Self::Selling => Bias::Short,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Buying => Self::Selling,
            Self::Selling => Self::Buying,
        }
    }
}

impl std::fmt::Display for CvdDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buying => write!(f, "buying"),
            Self::Selling => write!(f, "selling"),
        }
    }
}

/// Price behaviour at detection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceResponse {
    Flat,
    Opposite,
}

/// Where price sat relative to strict S/R at detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsorptionLocation {
    NearResistance,
    NearSupport,
    MidRange,
}

/// Terminal states of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    Trap,
    Accumulation,
    Distribution,
    Expired,
    Invalidated,
}

impl Resolution {
    /// Directional implication a resolution adds to the next cycle, if any.
    pub fn bias_implication(self, direction: CvdDirection) -> Option<Bias> {
        match self {
            // A trap fades the absorbed flow.
            Self::Trap => Some(direction.continuation_bias().opposite()),
            Self::Accumulation => Some(Bias::Long),
            Self::Distribution => Some(Bias::Short),
            Self::Expired | Self::Invalidated => None,
        }
    }
}

/// How the 2-of-3 criteria voted at resolution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionCriteria {
    pub trap_hits: u8,
    pub build_hits: u8,
    pub details: Vec<String>,
}

/// A tracked absorption event. Persisted across cycles; at most one
/// unresolved event exists per (symbol, timeframe, cvd_direction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsorptionEvent {
    pub id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub detected_at: i64,
    pub cvd_direction: CvdDirection,
    /// |CVD slope| at detection.
    pub cvd_strength: f64,
    pub cvd_noise_floor: f64,
    pub oi_at_detection: f64,
    /// Short description of OI behaviour at detection.
    pub oi_behavior: String,
    pub price_response: PriceResponse,
    pub price_at_detection: f64,
    pub location: AbsorptionLocation,
    /// The S/R level that classified the location, when near one.
    pub sr_level_used: Option<f64>,
    /// The opposite swing extremum at detection (break target for TRAP).
    pub opposite_level: Option<f64>,
    pub resolved_at: Option<i64>,
    pub resolution: Option<Resolution>,
    pub resolution_reason: Option<String>,
    pub resolution_criteria: Option<ResolutionCriteria>,
    /// 0 or 1: the single allowed data-gap extension.
    pub extensions_used: u8,
}

impl AbsorptionEvent {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_fades_the_absorbed_flow() {
        assert_eq!(
            Resolution::Trap.bias_implication(CvdDirection::Buying),
            Some(Bias::Short)
        );
        assert_eq!(
            Resolution::Trap.bias_implication(CvdDirection::Selling),
            Some(Bias::Long)
        );
        assert_eq!(Resolution::Expired.bias_implication(CvdDirection::Buying), None);
    }

    #[test]
    fn resolution_serialises_screaming() {
        assert_eq!(
            serde_json::to_string(&Resolution::Trap).unwrap(),
            "\"TRAP\""
        );
        assert_eq!(
            serde_json::to_string(&Resolution::Accumulation).unwrap(),
            "\"ACCUMULATION\""
        );
    }
}
