// =============================================================================
// Regime Classifier — predictive market-regime labeling
// =============================================================================
//
// Labels are predictive, not descriptive: `distribution` means price is
// expected to drop, not merely that OI rose while price stalled.
//
// The condition matrix is data: each rule is a set of simultaneous predicates
// over coarse feature states (price trend, OI trend, funding extremity, CVD
// slope sign, structure break). Rules are evaluated top-to-bottom, first
// match wins, unmatched input falls through to `unclear`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Bias, TradeStance};

// =============================================================================
// Labels
// =============================================================================

/// Predictive market regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeLabel {
    Distribution,
    Accumulation,
    LongTrap,
    ShortTrap,
    HealthyBull,
    HealthyBear,
    ShortCovering,
    Chop,
    Unclear,
}

impl RegimeLabel {
    /// Directional expectation this regime carries.
    pub fn bias_hint(self) -> Bias {
        match self {
            Self::Distribution | Self::LongTrap | Self::HealthyBear => Bias::Short,
            Self::Accumulation | Self::ShortTrap | Self::HealthyBull => Bias::Long,
            Self::ShortCovering | Self::Chop | Self::Unclear => Bias::Wait,
        }
    }

    /// Regimes that clamp the final decision to AVOID_TRADING.
    pub fn is_avoid(self) -> bool {
        matches!(self, Self::Chop | Self::Unclear)
    }

    /// Stance forced by the regime table, given the final bias. `None` leaves
    /// the bias-derived stance in place.
    pub fn stance_override(self, final_bias: Bias) -> Option<TradeStance> {
        match self {
            Self::Distribution | Self::HealthyBear => Some(TradeStance::LookForShorts),
            Self::Accumulation | Self::HealthyBull => Some(TradeStance::LookForLongs),
            // Traps permit only the fade direction; anything else is avoid.
            Self::LongTrap => Some(if final_bias == Bias::Short {
                TradeStance::LookForShorts
            } else {
                TradeStance::AvoidTrading
            }),
            Self::ShortTrap => Some(if final_bias == Bias::Long {
                TradeStance::LookForLongs
            } else {
                TradeStance::AvoidTrading
            }),
            Self::ShortCovering | Self::Chop | Self::Unclear => Some(TradeStance::AvoidTrading),
        }
    }
}

impl std::fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Distribution => "distribution",
            Self::Accumulation => "accumulation",
            Self::LongTrap => "long_trap",
            Self::ShortTrap => "short_trap",
            Self::HealthyBull => "healthy_bull",
            Self::HealthyBear => "healthy_bear",
            Self::ShortCovering => "short_covering",
            Self::Chop => "chop",
            Self::Unclear => "unclear",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Predicate vocabulary
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDir {
    Up,
    Down,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OiTrend {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingExtremity {
    PositiveExtreme,
    NegativeExtreme,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlopeSign {
    Positive,
    Negative,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureBreak {
    Bullish,
    Bearish,
    None,
}

/// Coarse feature states the classifier consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeInputs {
    pub price: TrendDir,
    pub oi: OiTrend,
    pub funding: FundingExtremity,
    pub cvd: SlopeSign,
    pub structure: StructureBreak,
}

/// Simultaneous predicates of one rule. `None` means "don't care".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RegimePredicates {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub price: Option<TrendDir>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub oi: Option<OiTrend>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub funding: Option<FundingExtremity>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cvd: Option<SlopeSign>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub structure: Option<StructureBreak>,
}

impl RegimePredicates {
    fn matches(&self, inputs: &RegimeInputs) -> bool {
        self.price.map_or(true, |p| p == inputs.price)
            && self.oi.map_or(true, |p| p == inputs.oi)
            && self.funding.map_or(true, |p| p == inputs.funding)
            && self.cvd.map_or(true, |p| p == inputs.cvd)
            && self.structure.map_or(true, |p| p == inputs.structure)
    }
}

/// One row of the regime condition matrix. Priority is the row's position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeRule {
    pub label: RegimeLabel,
    pub sub_type: String,
    pub confidence: f64,
    pub characteristics: Vec<String>,
    pub when: RegimePredicates,
}

/// Classifier output attached to the market state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAssessment {
    pub label: RegimeLabel,
    pub sub_type: String,
    pub confidence: f64,
    pub characteristics: Vec<String>,
}

impl RegimeAssessment {
    pub fn unclear() -> Self {
        Self {
            label: RegimeLabel::Unclear,
            sub_type: "no_rule_matched".to_string(),
            confidence: 2.0,
            characteristics: Vec::new(),
        }
    }
}

/// Evaluate the rule table top-to-bottom; first match wins.
pub fn classify(rules: &[RegimeRule], inputs: &RegimeInputs) -> RegimeAssessment {
    for rule in rules {
        if rule.when.matches(inputs) {
            debug!(label = %rule.label, sub_type = %rule.sub_type, "regime rule matched");
            return RegimeAssessment {
                label: rule.label,
                sub_type: rule.sub_type.clone(),
                confidence: rule.confidence,
                characteristics: rule.characteristics.clone(),
            };
        }
    }
    debug!("no regime rule matched — unclear");
    RegimeAssessment::unclear()
}

// =============================================================================
// Default condition matrix
// =============================================================================

/// The default regime table, ordered by priority. Traps outrank the plain
/// distribution/accumulation reads, which outrank the healthy trends.
pub fn default_regime_rules() -> Vec<RegimeRule> {
    fn rule(
        label: RegimeLabel,
        sub_type: &str,
        confidence: f64,
        characteristics: &[&str],
        when: RegimePredicates,
    ) -> RegimeRule {
        RegimeRule {
            label,
            sub_type: sub_type.to_string(),
            confidence,
            characteristics: characteristics.iter().map(|s| s.to_string()).collect(),
            when,
        }
    }

    vec![
        rule(
            RegimeLabel::LongTrap,
            "late_longs_absorbed",
            7.5,
            &[
                "price rising on crowded positive funding",
                "CVD fading while OI builds",
            ],
            RegimePredicates {
                price: Some(TrendDir::Up),
                oi: Some(OiTrend::Rising),
                funding: Some(FundingExtremity::PositiveExtreme),
                cvd: Some(SlopeSign::Negative),
                structure: None,
            },
        ),
        rule(
            RegimeLabel::ShortTrap,
            "late_shorts_absorbed",
            7.5,
            &[
                "price falling on crowded negative funding",
                "CVD rising while OI builds",
            ],
            RegimePredicates {
                price: Some(TrendDir::Down),
                oi: Some(OiTrend::Rising),
                funding: Some(FundingExtremity::NegativeExtreme),
                cvd: Some(SlopeSign::Positive),
                structure: None,
            },
        ),
        rule(
            RegimeLabel::Distribution,
            "supply_into_strength",
            7.0,
            &["price stalling while OI builds", "net selling into bids"],
            RegimePredicates {
                price: Some(TrendDir::Sideways),
                oi: Some(OiTrend::Rising),
                funding: None,
                cvd: Some(SlopeSign::Negative),
                structure: None,
            },
        ),
        rule(
            RegimeLabel::Accumulation,
            "demand_into_weakness",
            7.0,
            &["price stalling while OI builds", "net buying into offers"],
            RegimePredicates {
                price: Some(TrendDir::Sideways),
                oi: Some(OiTrend::Rising),
                funding: None,
                cvd: Some(SlopeSign::Positive),
                structure: None,
            },
        ),
        rule(
            RegimeLabel::ShortCovering,
            "rally_without_new_money",
            6.0,
            &["price rising while OI falls", "rally driven by closing shorts"],
            RegimePredicates {
                price: Some(TrendDir::Up),
                oi: Some(OiTrend::Falling),
                funding: None,
                cvd: None,
                structure: None,
            },
        ),
        rule(
            RegimeLabel::HealthyBull,
            "trend_with_participation",
            8.0,
            &["price and OI rising together", "funding not overheated"],
            RegimePredicates {
                price: Some(TrendDir::Up),
                oi: Some(OiTrend::Rising),
                funding: Some(FundingExtremity::Neutral),
                cvd: Some(SlopeSign::Positive),
                structure: None,
            },
        ),
        rule(
            RegimeLabel::HealthyBear,
            "decline_with_participation",
            8.0,
            &["price falling with OI rising", "funding not capitulating"],
            RegimePredicates {
                price: Some(TrendDir::Down),
                oi: Some(OiTrend::Rising),
                funding: Some(FundingExtremity::Neutral),
                cvd: Some(SlopeSign::Negative),
                structure: None,
            },
        ),
        rule(
            RegimeLabel::Chop,
            "no_participation",
            5.0,
            &["sideways price", "flat open interest"],
            RegimePredicates {
                price: Some(TrendDir::Sideways),
                oi: Some(OiTrend::Flat),
                funding: None,
                cvd: None,
                structure: None,
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(
        price: TrendDir,
        oi: OiTrend,
        funding: FundingExtremity,
        cvd: SlopeSign,
    ) -> RegimeInputs {
        RegimeInputs {
            price,
            oi,
            funding,
            cvd,
            structure: StructureBreak::None,
        }
    }

    #[test]
    fn long_trap_outranks_healthy_bull() {
        let rules = default_regime_rules();
        // Price up + OI up + CVD negative + extreme funding = trap, even
        // though a bull-looking market.
        let a = classify(
            &rules,
            &inputs(
                TrendDir::Up,
                OiTrend::Rising,
                FundingExtremity::PositiveExtreme,
                SlopeSign::Negative,
            ),
        );
        assert_eq!(a.label, RegimeLabel::LongTrap);
    }

    #[test]
    fn healthy_bull_detected() {
        let rules = default_regime_rules();
        let a = classify(
            &rules,
            &inputs(
                TrendDir::Up,
                OiTrend::Rising,
                FundingExtremity::Neutral,
                SlopeSign::Positive,
            ),
        );
        assert_eq!(a.label, RegimeLabel::HealthyBull);
        assert_eq!(a.label.bias_hint(), Bias::Long);
    }

    #[test]
    fn distribution_vs_accumulation_split_on_cvd() {
        let rules = default_regime_rules();
        let d = classify(
            &rules,
            &inputs(
                TrendDir::Sideways,
                OiTrend::Rising,
                FundingExtremity::Neutral,
                SlopeSign::Negative,
            ),
        );
        assert_eq!(d.label, RegimeLabel::Distribution);

        let a = classify(
            &rules,
            &inputs(
                TrendDir::Sideways,
                OiTrend::Rising,
                FundingExtremity::Neutral,
                SlopeSign::Positive,
            ),
        );
        assert_eq!(a.label, RegimeLabel::Accumulation);
    }

    #[test]
    fn unmatched_is_unclear() {
        let rules = default_regime_rules();
        let a = classify(
            &rules,
            &inputs(
                TrendDir::Down,
                OiTrend::Falling,
                FundingExtremity::Neutral,
                SlopeSign::Positive,
            ),
        );
        assert_eq!(a.label, RegimeLabel::Unclear);
        assert!(a.label.is_avoid());
    }

    #[test]
    fn trap_stance_override_permits_only_fade() {
        assert_eq!(
            RegimeLabel::LongTrap.stance_override(Bias::Short),
            Some(TradeStance::LookForShorts)
        );
        assert_eq!(
            RegimeLabel::LongTrap.stance_override(Bias::Long),
            Some(TradeStance::AvoidTrading)
        );
        assert_eq!(
            RegimeLabel::ShortCovering.stance_override(Bias::Long),
            Some(TradeStance::AvoidTrading)
        );
    }

    #[test]
    fn rules_serialise_roundtrip() {
        let rules = default_regime_rules();
        let json = serde_json::to_string(&rules).unwrap();
        let back: Vec<RegimeRule> = serde_json::from_str(&json).unwrap();
        assert_eq!(rules, back);
    }
}
