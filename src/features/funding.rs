// =============================================================================
// Funding — z-score against the rolling mean and extremity classification
// =============================================================================
//
// Funding only carries directional information at extremes: crowded longs
// (extreme positive) predict downside, crowded shorts predict a squeeze.
// The extremity cut is the config's `funding_z_extreme` gate.

use serde::{Deserialize, Serialize};

use crate::features::stats::z_score;
use crate::market_data::FundingPoint;
use crate::regime::FundingExtremity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingFeature {
    /// Latest funding rate (decimal, e.g. 0.0001 = 0.01%).
    pub current: f64,
    /// Z-score of the latest rate vs the rolling window.
    pub z: f64,
    pub extremity: FundingExtremity,
}

/// Compute the funding feature over the trailing series (oldest first).
/// `z_extreme` is the gate above which funding becomes directional.
pub fn compute(funding: &[FundingPoint], z_extreme: f64) -> Option<FundingFeature> {
    if funding.len() < 8 {
        return None;
    }
    let current = funding.last()?.rate;
    let window: Vec<f64> = funding[..funding.len() - 1].iter().map(|p| p.rate).collect();

    // Zero dispersion (constant funding) is a legitimate state: z is 0.
    let z = z_score(current, &window).unwrap_or(0.0);

    let extremity = if z >= z_extreme {
        FundingExtremity::PositiveExtreme
    } else if z <= -z_extreme {
        FundingExtremity::NegativeExtreme
    } else {
        FundingExtremity::Neutral
    };

    Some(FundingFeature {
        current,
        z,
        extremity,
    })
}
