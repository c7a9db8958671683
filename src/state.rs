// =============================================================================
// Market State — the fixed-schema output object and its assembler
// =============================================================================
//
// Immutable once assembled. The schema is versioned; every enum field is a
// sum type so consumers can match exhaustively. The assembler is also where
// a RESOLVED absorption event pays its confidence bonus — and the only place
// absorption may touch bias or confidence at all.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::absorption::{AbsorptionEngine, AbsorptionStore, Resolution};
use crate::config::Config;
use crate::decision::{BucketVerdict, FinalDecision};
use crate::divergence::DivergenceAssessment;
use crate::regime::{RegimeAssessment, RegimeLabel};
use crate::signals::TimeframeVerdicts;
use crate::types::{Bias, RiskMode, Timeframe, TradeStance};

pub const SCHEMA_VERSION: &str = "1.0";

/// How many intervals after resolution an absorption verdict keeps paying
/// its bonus into assembled states.
const RESOLUTION_ACTIVE_INTERVALS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbsorptionStatus {
    None,
    Detecting,
    Resolved,
}

/// Absorption block of the market state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsorptionSummary {
    pub status: AbsorptionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bias_implication: Option<Bias>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_bonus: Option<f64>,
    /// Open (DETECTING) events this cycle.
    pub detecting_count: usize,
}

impl AbsorptionSummary {
    pub fn none() -> Self {
        Self {
            status: AbsorptionStatus::None,
            resolution: None,
            bias_implication: None,
            confidence_bonus: None,
            detecting_count: 0,
        }
    }

    /// Derive the summary from the store at `as_of`. A resolution stays
    /// active for a bounded number of its timeframe's intervals.
    pub fn from_store(
        store: &AbsorptionStore,
        symbol: &str,
        current_price: f64,
        params: &crate::config::AbsorptionParams,
        as_of_ms: i64,
    ) -> Self {
        let detecting = store.unresolved(Some(symbol));

        let active_resolution = store
            .resolved_since(symbol, 0)
            .into_iter()
            .filter(|e| {
                let window = RESOLUTION_ACTIVE_INTERVALS * e.timeframe.interval_ms();
                e.resolved_at
                    .map_or(false, |t| as_of_ms - t <= window && as_of_ms >= t)
            })
            .find(|e| {
                e.resolution
                    .map_or(false, |r| r.bias_implication(e.cvd_direction).is_some())
            });

        match active_resolution {
            Some(event) => {
                let resolution = event.resolution.expect("resolved event has resolution");
                let bias = resolution.bias_implication(event.cvd_direction);
                let bonus = AbsorptionEngine::resolution_bonus(&event, current_price, params);
                Self {
                    status: AbsorptionStatus::Resolved,
                    resolution: Some(resolution),
                    bias_implication: bias,
                    confidence_bonus: Some(bonus),
                    detecting_count: detecting.len(),
                }
            }
            None if !detecting.is_empty() => Self {
                status: AbsorptionStatus::Detecting,
                resolution: None,
                bias_implication: None,
                confidence_bonus: None,
                detecting_count: detecting.len(),
            },
            None => Self::none(),
        }
    }
}

/// Final decision block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalBlock {
    pub bias: Bias,
    pub confidence: f64,
    pub direction_confidence: f64,
    pub no_trade_confidence: f64,
    pub trade_stance: TradeStance,
    pub risk_mode: RiskMode,
    pub primary_regime: RegimeLabel,
    pub macro_anchored: bool,
    pub warnings: Vec<String>,
}

/// The three bucket verdicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketBlock {
    #[serde(rename = "macro")]
    pub macro_bucket: BucketVerdict,
    pub micro: BucketVerdict,
    pub scalping: BucketVerdict,
}

/// Reliability summary: per-signal flags and staleness per timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReliabilityBlock {
    /// tf code -> signal name -> reliable.
    pub per_signal: BTreeMap<String, BTreeMap<String, bool>>,
    /// tf code -> ms between last candle close and as-of.
    pub staleness_ms: BTreeMap<String, i64>,
    /// Total signals gated off across timeframes.
    pub gated_count: usize,
}

/// The primary output object of the engine. Immutable once assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub schema_version: String,
    pub config_version: String,
    /// As-of instant of this state, ms UTC.
    pub timestamp: i64,
    pub symbol: String,
    pub primary_timeframe: Timeframe,
    /// Last close of the primary timeframe at the as-of instant.
    pub last_price: f64,
    #[serde(rename = "final")]
    pub final_block: FinalBlock,
    pub buckets: BucketBlock,
    pub per_timeframe: BTreeMap<Timeframe, TimeframeVerdicts>,
    pub regime: RegimeAssessment,
    pub divergence: DivergenceAssessment,
    pub absorption: AbsorptionSummary,
    pub reliability: ReliabilityBlock,
}

/// Inputs the assembler composes. Everything is already computed; assembly
/// only merges, applies the absorption bonus, and freezes the schema.
pub struct AssemblyInput {
    pub symbol: String,
    pub primary_timeframe: Timeframe,
    pub as_of_ms: i64,
    /// Last close of the primary timeframe (0.0 when no data).
    pub last_price: f64,
    pub decision: FinalDecision,
    pub macro_bucket: BucketVerdict,
    pub micro: BucketVerdict,
    pub scalping: BucketVerdict,
    pub per_timeframe: BTreeMap<Timeframe, TimeframeVerdicts>,
    pub regime: RegimeAssessment,
    pub divergence: DivergenceAssessment,
    pub absorption: AbsorptionSummary,
    /// tf code -> ms between last candle close and as-of.
    pub staleness_ms: BTreeMap<String, i64>,
    pub extra_warnings: Vec<String>,
}

/// Compose the final market state.
pub fn assemble(config: &Config, input: AssemblyInput) -> MarketState {
    let AssemblyInput {
        symbol,
        primary_timeframe,
        as_of_ms,
        last_price,
        decision,
        macro_bucket,
        micro,
        scalping,
        per_timeframe,
        regime,
        divergence,
        absorption,
        staleness_ms,
        extra_warnings,
    } = input;

    let mut warnings = decision.warnings.clone();
    warnings.extend(extra_warnings);
    for tv in per_timeframe.values() {
        warnings.extend(tv.warnings.iter().cloned());
    }
    warnings.extend(divergence.warnings.iter().cloned());

    let mut confidence = decision.confidence;
    let mut bias = decision.bias;

    // A RESOLVED absorption verdict is the only absorption influence on the
    // decision. DETECTING events contribute a warning and nothing else.
    match absorption.status {
        AbsorptionStatus::Resolved => {
            if let (Some(implied), Some(bonus)) =
                (absorption.bias_implication, absorption.confidence_bonus)
            {
                if bias == implied {
                    confidence = (confidence + bonus).min(10.0);
                    warnings.push(format!(
                        "Absorption {} confirms {} (+{:.0} confidence)",
                        absorption
                            .resolution
                            .map(|r| format!("{r:?}"))
                            .unwrap_or_default(),
                        implied,
                        bonus
                    ));
                } else if bias == Bias::Wait {
                    bias = implied;
                    confidence = bonus.min(10.0);
                    warnings.push(format!(
                        "Absorption resolution implies {implied} while signals wait"
                    ));
                } else {
                    warnings.push(format!(
                        "Absorption resolution implies {implied} against the current bias"
                    ));
                }
            }
        }
        AbsorptionStatus::Detecting => {
            warnings.push(format!(
                "Absorption detecting on {} event(s) — monitoring, no bias impact",
                absorption.detecting_count
            ));
        }
        AbsorptionStatus::None => {}
    }

    let mut per_signal = BTreeMap::new();
    let mut gated_count = 0;
    for (tf, tv) in &per_timeframe {
        per_signal.insert(tf.code().to_string(), tv.reliable_flags());
        gated_count += tv.gated_off;
    }

    let state = MarketState {
        schema_version: SCHEMA_VERSION.to_string(),
        config_version: config.version.clone(),
        timestamp: as_of_ms,
        symbol,
        primary_timeframe,
        last_price,
        final_block: FinalBlock {
            bias,
            confidence,
            direction_confidence: confidence,
            no_trade_confidence: decision.no_trade_confidence,
            trade_stance: decision.trade_stance,
            risk_mode: decision.risk_mode,
            primary_regime: regime.label,
            macro_anchored: decision.macro_anchored,
            warnings,
        },
        buckets: BucketBlock {
            macro_bucket,
            micro,
            scalping,
        },
        per_timeframe,
        regime,
        divergence,
        absorption,
        reliability: ReliabilityBlock {
            per_signal,
            staleness_ms,
            gated_count,
        },
    };

    debug!(
        symbol = %state.symbol,
        bias = %state.final_block.bias,
        confidence = format!("{:.2}", state.final_block.confidence),
        regime = %state.regime.label,
        "market state assembled"
    );

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParams;
    use crate::types::Bucket;

    fn test_config() -> Config {
        Config {
            version: "v1".to_string(),
            params: ConfigParams::default(),
            created_at: 0,
            created_by: "test".to_string(),
            notes: String::new(),
        }
    }

    fn base_input(bias: Bias, confidence: f64) -> AssemblyInput {
        AssemblyInput {
            symbol: "BTCUSDT".to_string(),
            primary_timeframe: Timeframe::H1,
            as_of_ms: 1_700_000_000_000,
            last_price: 87_000.0,
            decision: FinalDecision {
                bias,
                confidence,
                direction_confidence: confidence,
                no_trade_confidence: 2.0,
                trade_stance: match bias {
                    Bias::Long => TradeStance::LookForLongs,
                    Bias::Short => TradeStance::LookForShorts,
                    Bias::Wait => TradeStance::AvoidTrading,
                },
                risk_mode: RiskMode::Normal,
                macro_anchored: false,
                warnings: Vec::new(),
            },
            macro_bucket: BucketVerdict::empty(Bucket::Macro),
            micro: BucketVerdict::empty(Bucket::Micro),
            scalping: BucketVerdict::empty(Bucket::Scalping),
            per_timeframe: BTreeMap::new(),
            regime: RegimeAssessment::unclear(),
            divergence: DivergenceAssessment::unclear(0.0, 0.0),
            absorption: AbsorptionSummary::none(),
            staleness_ms: BTreeMap::new(),
            extra_warnings: Vec::new(),
        }
    }

    #[test]
    fn detecting_status_never_touches_confidence() {
        let config = test_config();
        let mut input = base_input(Bias::Long, 6.0);
        input.absorption = AbsorptionSummary {
            status: AbsorptionStatus::Detecting,
            resolution: None,
            bias_implication: None,
            confidence_bonus: None,
            detecting_count: 1,
        };
        let with_detecting = assemble(&config, input);

        let baseline = assemble(&config, base_input(Bias::Long, 6.0));
        assert_eq!(
            with_detecting.final_block.confidence,
            baseline.final_block.confidence
        );
        assert_eq!(with_detecting.final_block.bias, baseline.final_block.bias);
        assert!(with_detecting
            .final_block
            .warnings
            .iter()
            .any(|w| w.contains("no bias impact")));
    }

    #[test]
    fn matching_resolution_pays_bonus_capped_at_ten() {
        let config = test_config();
        let mut input = base_input(Bias::Short, 6.0);
        input.absorption = AbsorptionSummary {
            status: AbsorptionStatus::Resolved,
            resolution: Some(Resolution::Trap),
            bias_implication: Some(Bias::Short),
            confidence_bonus: Some(2.0),
            detecting_count: 0,
        };
        let state = assemble(&config, input);
        assert!((state.final_block.confidence - 8.0).abs() < 1e-9);

        let mut input = base_input(Bias::Short, 9.5);
        input.absorption = AbsorptionSummary {
            status: AbsorptionStatus::Resolved,
            resolution: Some(Resolution::Trap),
            bias_implication: Some(Bias::Short),
            confidence_bonus: Some(2.0),
            detecting_count: 0,
        };
        let state = assemble(&config, input);
        assert!((state.final_block.confidence - 10.0).abs() < 1e-9);
    }

    #[test]
    fn opposing_resolution_only_warns() {
        let config = test_config();
        let mut input = base_input(Bias::Long, 6.0);
        input.absorption = AbsorptionSummary {
            status: AbsorptionStatus::Resolved,
            resolution: Some(Resolution::Trap),
            bias_implication: Some(Bias::Short),
            confidence_bonus: Some(2.0),
            detecting_count: 0,
        };
        let state = assemble(&config, input);
        assert_eq!(state.final_block.bias, Bias::Long);
        assert!((state.final_block.confidence - 6.0).abs() < 1e-9);
        assert!(state
            .final_block
            .warnings
            .iter()
            .any(|w| w.contains("against the current bias")));
    }

    #[test]
    fn state_serialises_with_wire_field_names() {
        let config = test_config();
        let state = assemble(&config, base_input(Bias::Long, 5.0));
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("final").is_some());
        assert!(json["buckets"].get("macro").is_some());
        assert_eq!(json["schema_version"], "1.0");
        assert_eq!(json["config_version"], "v1");
        assert_eq!(json["final"]["bias"], "LONG");
        assert_eq!(json["final"]["trade_stance"], "LOOK_FOR_LONGS");
    }
}
