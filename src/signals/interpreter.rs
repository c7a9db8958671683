// =============================================================================
// Signal Interpreter — feature bundles to per-signal verdicts
// =============================================================================
//
// One verdict per signal family named in the config weights map. Verdicts
// carry a reasoning string tied to the numeric trigger. Reliability gates run
// before weighting: a gated signal keeps its verdict (bias WAIT) but loses
// its weight, and the remaining weights are renormalized.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::ConfigParams;
use crate::divergence::DivergenceAssessment;
use crate::features::{FeatureSet, OiAlignment, VwapPosition};
use crate::regime::{RegimeAssessment, SlopeSign, StructureBreak, TrendDir};
use crate::signals::reliability::{cvd_gate, staleness_gate, renormalize};
use crate::signals::{SignalVerdict, TimeframeVerdicts};
use crate::types::Bias;

/// Interpret every configured signal for one timeframe.
///
/// `regime` and `divergence` are computed once per pipeline run and
/// replicated into each timeframe's verdict set as weighted families.
pub fn interpret_timeframe(
    features: &FeatureSet,
    regime: &RegimeAssessment,
    divergence: &DivergenceAssessment,
    config: &ConfigParams,
    as_of_ms: i64,
) -> TimeframeVerdicts {
    let tf = features.timeframe;
    let thresholds = config.thresholds_for(tf);
    let mut warnings: Vec<String> = Vec::new();

    let mut verdicts: Vec<SignalVerdict> = Vec::new();
    let mut weights: BTreeMap<String, f64> = BTreeMap::new();

    let staleness = staleness_gate(
        features.last_data_ms,
        as_of_ms,
        tf,
        config.gates.staleness_multiplier,
    );
    if let Some(w) = &staleness.warning {
        warnings.push(w.clone());
    }

    for (name, &base_weight) in &config.weights.signals {
        let mut verdict = match name.as_str() {
            "technical" => technical_verdict(features, &thresholds.noise_pct),
            "structure" => structure_verdict(features),
            "cvd" => cvd_verdict(features),
            "vwap" => vwap_verdict(features),
            "funding" => funding_verdict(features, config.gates.funding_z_extreme),
            "oi" | "open_interest" => oi_verdict(features),
            "market_regime" => regime_verdict(regime),
            "exchange_divergence" => divergence_verdict(divergence),
            "volume_profile" => volume_profile_verdict(features),
            other => SignalVerdict {
                name: other.to_string(),
                bias: Bias::Wait,
                confidence: 0.0,
                weight: 0.0,
                reliable: false,
                reasoning: format!("unknown signal family '{other}'"),
            },
        };

        let mut keep_weight = verdict.reliable;

        // CVD carries its own reliability gate on top of the verdict.
        if name == "cvd" {
            let gate = cvd_gate(
                features.cvd.as_ref(),
                &features.taker_resolution,
                tf,
                &thresholds.cvd,
            );
            if !gate.reliable {
                verdict.bias = Bias::Wait;
                verdict.reliable = false;
                keep_weight = false;
                if let Some(w) = gate.warning {
                    verdict.reasoning = w.clone();
                    warnings.push(w);
                }
            }
        }

        // Staleness applies to every signal on the timeframe.
        if !staleness.keep_weight {
            keep_weight = false;
            verdict.reliable = false;
        }
        verdict.confidence *= staleness.confidence_mult;

        verdict.weight = if keep_weight { base_weight } else { 0.0 };
        weights.insert(name.clone(), verdict.weight);
        verdicts.push(verdict);
    }

    // When every signal is gated the map falls back to uniform weights (the
    // state must still carry a unit weight vector), but the verdicts keep
    // weight 0 so no bias is fabricated from unreliable data.
    let all_gated = weights.values().sum::<f64>() < f64::EPSILON;
    renormalize(&mut weights);
    for v in &mut verdicts {
        v.weight = if all_gated {
            0.0
        } else {
            *weights.get(&v.name).unwrap_or(&0.0)
        };
    }

    // Weighted directional scores on the unit weight vector.
    let mut long_score = 0.0;
    let mut short_score = 0.0;
    let mut wait_score = 0.0;
    for v in &verdicts {
        match v.bias {
            Bias::Long => long_score += v.weight * v.confidence,
            Bias::Short => short_score += v.weight * v.confidence,
            Bias::Wait => wait_score += v.weight * v.confidence,
        }
    }

    let gated_off = verdicts.iter().filter(|v| !v.reliable).count();

    let (bias, confidence) = resolve_direction(
        long_score,
        short_score,
        config.penalties.conflict_ratio,
    );

    debug!(
        tf = %tf,
        bias = %bias,
        confidence = format!("{confidence:.2}"),
        long = format!("{long_score:.2}"),
        short = format!("{short_score:.2}"),
        gated_off,
        "timeframe interpreted"
    );

    TimeframeVerdicts {
        timeframe: tf,
        bias,
        confidence,
        long_score,
        short_score,
        wait_score,
        verdicts,
        effective_weights: weights,
        gated_off,
        stale: !staleness.reliable || staleness.confidence_mult < 1.0,
        warnings,
    }
}

/// Directional resolution shared by timeframe and bucket levels: the weaker
/// side within `conflict_ratio` of the stronger one forces WAIT.
pub fn resolve_direction(long_score: f64, short_score: f64, conflict_ratio: f64) -> (Bias, f64) {
    let (winner, winner_score, loser_score) = if long_score >= short_score {
        (Bias::Long, long_score, short_score)
    } else {
        (Bias::Short, short_score, long_score)
    };
    if winner_score < f64::EPSILON {
        return (Bias::Wait, 0.0);
    }
    if loser_score / winner_score > conflict_ratio {
        return (Bias::Wait, winner_score.min(10.0));
    }
    (winner, winner_score.min(10.0))
}

// =============================================================================
// Per-signal verdicts
// =============================================================================

fn technical_verdict(features: &FeatureSet, noise_pct: &f64) -> SignalVerdict {
    let name = "technical".to_string();
    let trend = match &features.trend {
        Some(t) => t,
        None => {
            return SignalVerdict {
                name,
                bias: Bias::Wait,
                confidence: 0.0,
                weight: 0.0,
                reliable: false,
                reasoning: "trend unavailable (insufficient closes)".to_string(),
            };
        }
    };

    let momentum = features.momentum_pct.unwrap_or(0.0);
    let (bias, mut confidence) = match trend.direction {
        TrendDir::Up => (Bias::Long, 5.0),
        TrendDir::Down => (Bias::Short, 5.0),
        TrendDir::Sideways => (Bias::Wait, 3.0),
    };

    if bias.is_directional() {
        // Strength and momentum agreement each add up to 2 points.
        confidence += (trend.strength.abs() * 10.0).min(2.0);
        if momentum * bias.sign() > *noise_pct {
            confidence += 1.5;
        }
        if trend.recent_cross {
            confidence += 0.5;
        }
    }

    SignalVerdict {
        name,
        bias,
        confidence: confidence.min(10.0),
        weight: 0.0,
        reliable: true,
        reasoning: format!(
            "EMA20 {:.2} vs EMA50 {:.2}, slope/sd {:.3}, momentum {:.2}%",
            trend.ema20, trend.ema50, trend.strength, momentum
        ),
    }
}

fn structure_verdict(features: &FeatureSet) -> SignalVerdict {
    let name = "structure".to_string();
    let s = match &features.structure {
        Some(s) => s,
        None => {
            return SignalVerdict {
                name,
                bias: Bias::Wait,
                confidence: 0.0,
                weight: 0.0,
                reliable: false,
                reasoning: "structure unavailable (insufficient candles)".to_string(),
            };
        }
    };

    let (bias, confidence, reasoning) = match s.bos {
        StructureBreak::Bullish => (
            Bias::Long,
            7.0,
            format!(
                "close {:.2} broke above swing high {:.2}",
                features.last_close,
                s.resistance.unwrap_or(f64::NAN)
            ),
        ),
        StructureBreak::Bearish => (
            Bias::Short,
            7.0,
            format!(
                "close {:.2} broke below swing low {:.2}",
                features.last_close,
                s.support.unwrap_or(f64::NAN)
            ),
        ),
        StructureBreak::None => (
            Bias::Wait,
            3.0,
            format!(
                "range intact: support {:.2} / resistance {:.2}",
                s.support.unwrap_or(f64::NAN),
                s.resistance.unwrap_or(f64::NAN)
            ),
        ),
    };

    SignalVerdict {
        name,
        bias,
        confidence,
        weight: 0.0,
        reliable: true,
        reasoning,
    }
}

fn cvd_verdict(features: &FeatureSet) -> SignalVerdict {
    let name = "cvd".to_string();
    let cvd = match &features.cvd {
        Some(c) => c,
        None => {
            return SignalVerdict {
                name,
                bias: Bias::Wait,
                confidence: 0.0,
                weight: 0.0,
                reliable: false,
                reasoning: "CVD series unavailable".to_string(),
            };
        }
    };

    let (bias, confidence) = match cvd.direction {
        SlopeSign::Positive => {
            let ratio = if cvd.noise_floor > f64::EPSILON {
                cvd.slope.abs() / cvd.noise_floor
            } else {
                1.0
            };
            (Bias::Long, (5.0 + ratio.min(3.0)).min(10.0))
        }
        SlopeSign::Negative => {
            let ratio = if cvd.noise_floor > f64::EPSILON {
                cvd.slope.abs() / cvd.noise_floor
            } else {
                1.0
            };
            (Bias::Short, (5.0 + ratio.min(3.0)).min(10.0))
        }
        SlopeSign::Flat => (Bias::Wait, 3.0),
    };

    SignalVerdict {
        name,
        bias,
        confidence,
        weight: 0.0,
        reliable: true,
        reasoning: format!(
            "CVD slope {:.4} vs noise floor {:.4} ({})",
            cvd.slope,
            cvd.noise_floor,
            if cvd.strong { "strong" } else { "inside noise" }
        ),
    }
}

fn vwap_verdict(features: &FeatureSet) -> SignalVerdict {
    let name = "vwap".to_string();
    let v = match &features.vwap {
        Some(v) => v,
        None => {
            return SignalVerdict {
                name,
                bias: Bias::Wait,
                confidence: 0.0,
                weight: 0.0,
                reliable: false,
                reasoning: "session VWAP unavailable".to_string(),
            };
        }
    };

    let (bias, confidence, note) = match v.position {
        VwapPosition::AboveInner => (Bias::Long, 5.5, "holding above value"),
        VwapPosition::AboveOuter => (Bias::Long, 4.0, "stretched above outer band"),
        VwapPosition::BelowInner => (Bias::Short, 5.5, "holding below value"),
        VwapPosition::BelowOuter => (Bias::Short, 4.0, "stretched below outer band"),
        VwapPosition::Inside => (Bias::Wait, 3.0, "inside value bands"),
    };

    SignalVerdict {
        name,
        bias,
        confidence,
        weight: 0.0,
        reliable: true,
        reasoning: format!(
            "close {:.2} vs VWAP {:.2} ({note})",
            features.last_close, v.vwap
        ),
    }
}

fn funding_verdict(features: &FeatureSet, z_extreme: f64) -> SignalVerdict {
    let name = "funding".to_string();
    let f = match &features.funding {
        Some(f) => f,
        None => {
            return SignalVerdict {
                name,
                bias: Bias::Wait,
                confidence: 0.0,
                weight: 0.0,
                reliable: false,
                reasoning: "funding series unavailable".to_string(),
            };
        }
    };

    // Funding is contrarian and only directional at extremes.
    let (bias, confidence, note) = if f.z >= z_extreme {
        (Bias::Short, 6.0, "crowded longs paying extreme funding")
    } else if f.z <= -z_extreme {
        (Bias::Long, 6.0, "crowded shorts paying extreme funding")
    } else {
        (Bias::Wait, 2.0, "funding within normal band")
    };

    SignalVerdict {
        name,
        bias,
        confidence,
        weight: 0.0,
        reliable: true,
        reasoning: format!("rate {:.5} z {:.2} ({note})", f.current, f.z),
    }
}

fn oi_verdict(features: &FeatureSet) -> SignalVerdict {
    let name = "oi".to_string();
    let oi = match &features.oi {
        Some(o) => o,
        None => {
            return SignalVerdict {
                name,
                bias: Bias::Wait,
                confidence: 0.0,
                weight: 0.0,
                reliable: false,
                reasoning: "OI series unavailable".to_string(),
            };
        }
    };

    let (bias, confidence) = match oi.alignment {
        OiAlignment::BullishDivergence => (Bias::Long, 5.0),
        OiAlignment::BearishDivergence => (Bias::Short, 5.0),
        OiAlignment::Aligned => (Bias::Wait, 3.0),
    };

    SignalVerdict {
        name,
        bias,
        confidence,
        weight: 0.0,
        reliable: true,
        reasoning: format!("OI change {:.2}% ({:?})", oi.change_pct, oi.alignment),
    }
}

fn regime_verdict(regime: &RegimeAssessment) -> SignalVerdict {
    SignalVerdict {
        name: "market_regime".to_string(),
        bias: regime.label.bias_hint(),
        confidence: regime.confidence.min(10.0),
        weight: 0.0,
        reliable: true,
        reasoning: format!("regime {} ({})", regime.label, regime.sub_type),
    }
}

fn divergence_verdict(divergence: &DivergenceAssessment) -> SignalVerdict {
    SignalVerdict {
        name: "exchange_divergence".to_string(),
        bias: divergence.bias,
        confidence: divergence.confidence.min(10.0),
        weight: 0.0,
        reliable: true,
        reasoning: format!(
            "scenario {} (retail OI {:.2}%, whale OI {:.2}%)",
            divergence.scenario, divergence.retail_oi_delta_pct, divergence.whale_oi_delta_pct
        ),
    }
}

fn volume_profile_verdict(features: &FeatureSet) -> SignalVerdict {
    let name = "volume_profile".to_string();
    let vp = match &features.volume_profile {
        Some(v) => v,
        None => {
            return SignalVerdict {
                name,
                bias: Bias::Wait,
                confidence: 0.0,
                weight: 0.0,
                reliable: false,
                reasoning: "volume profile unavailable".to_string(),
            };
        }
    };

    let close = features.last_close;
    let (bias, confidence, note) = if close > vp.vah {
        (Bias::Long, 5.0, "accepted above value area")
    } else if close < vp.val {
        (Bias::Short, 5.0, "accepted below value area")
    } else {
        (Bias::Wait, 3.0, "rotating inside value area")
    };

    SignalVerdict {
        name,
        bias,
        confidence,
        weight: 0.0,
        reliable: true,
        reasoning: format!(
            "close {close:.2} vs POC {:.2} VA [{:.2}, {:.2}] ({note})",
            vp.poc, vp.val, vp.vah
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features;
    use crate::market_data::SeriesBundle;
    use crate::types::Timeframe;

    fn interpreted(bundle: &SeriesBundle, config: &ConfigParams) -> TimeframeVerdicts {
        let tf = bundle.timeframe;
        let fs = features::compute(
            bundle,
            &config.thresholds_for(tf),
            config.gates.funding_z_extreme,
            config.data.min_candles,
        )
        .unwrap();
        let as_of = fs.last_data_ms + tf.interval_ms();
        interpret_timeframe(
            &fs,
            &RegimeAssessment::unclear(),
            &DivergenceAssessment::unclear(0.0, 0.0),
            config,
            as_of,
        )
    }

    #[test]
    fn effective_weights_sum_to_one() {
        let config = ConfigParams::default();
        let bundle = features::tests::bundle_with_trend(Timeframe::H1, 120, 0.5);
        let tv = interpreted(&bundle, &config);
        let sum: f64 = tv.effective_weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum={sum}");
    }

    #[test]
    fn uptrend_bundle_reads_long() {
        let config = ConfigParams::default();
        let bundle = features::tests::bundle_with_trend(Timeframe::H1, 120, 0.5);
        let tv = interpreted(&bundle, &config);
        assert_eq!(tv.bias, Bias::Long);
        assert!(tv.confidence > 0.0);
        let technical = tv.verdicts.iter().find(|v| v.name == "technical").unwrap();
        assert_eq!(technical.bias, Bias::Long);
        assert!(technical.reasoning.contains("EMA20"));
    }

    #[test]
    fn short_cvd_series_gates_cvd_and_renormalizes() {
        let config = ConfigParams::default();
        let mut bundle = features::tests::bundle_with_trend(Timeframe::M30, 120, 0.5);
        // 30 of the expected 50 candles: under the 80% floor.
        bundle.taker.drain(..bundle.taker.len() - 30);
        let tv = interpreted(&bundle, &config);

        let cvd = tv.verdicts.iter().find(|v| v.name == "cvd").unwrap();
        assert!(!cvd.reliable);
        assert_eq!(cvd.bias, Bias::Wait);
        assert!(cvd.weight.abs() < 1e-12);
        assert!(tv.warnings.iter().any(|w| w.contains("CVD")));

        let sum: f64 = tv.effective_weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn stale_timeframe_zero_weights_everything() {
        let config = ConfigParams::default();
        let bundle = features::tests::bundle_with_trend(Timeframe::M30, 120, 0.5);
        let tf = Timeframe::M30;
        let fs = features::compute(
            &bundle,
            &config.thresholds_for(tf),
            config.gates.funding_z_extreme,
            config.data.min_candles,
        )
        .unwrap();
        // As-of far beyond 4x the timeframe.
        let as_of = fs.last_data_ms + 10 * tf.interval_ms();
        let tv = interpret_timeframe(
            &fs,
            &RegimeAssessment::unclear(),
            &DivergenceAssessment::unclear(0.0, 0.0),
            &config,
            as_of,
        );
        assert_eq!(tv.bias, Bias::Wait);
        assert_eq!(tv.gated_off, tv.verdicts.len());
        // Uniform fallback still sums to 1.
        let sum: f64 = tv.effective_weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn resolve_direction_conflict_forces_wait() {
        let (bias, _) = resolve_direction(5.0, 4.0, 0.7);
        assert_eq!(bias, Bias::Wait);
        let (bias, conf) = resolve_direction(5.0, 2.0, 0.7);
        assert_eq!(bias, Bias::Long);
        assert!((conf - 5.0).abs() < 1e-9);
        let (bias, _) = resolve_direction(0.0, 0.0, 0.7);
        assert_eq!(bias, Bias::Wait);
    }
}
