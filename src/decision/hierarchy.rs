// =============================================================================
// Hierarchical Decision — the three-layer permission contract
// =============================================================================
//
// Macro grants permission and anchors the direction, Micro confirms the
// setup, Scalping only times the execution. The steps apply in order:
//
//   1. Macro permission gate          6. Alignment bonus
//   2. Macro anchoring                7. Dual confidence
//   3. Setup alignment (Micro veto)   8. Regime clamp (chop/unclear)
//   4. Execution trigger (Scalping)   9. Stance mapping + regime table
//   5. Conflict penalty              10. Risk mode
//
// When the macro anchor holds (step 2), lower buckets can only reduce
// confidence — the micro veto of step 3 applies to unanchored macro reads.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigParams;
use crate::decision::BucketVerdict;
use crate::regime::RegimeAssessment;
use crate::types::{Bias, RiskMode, TradeStance};

pub const MACRO_ANCHOR_WARNING: &str = "Macro anchored — lower TF opposing";

/// Cross-bucket context the ten steps need beyond the three verdicts.
#[derive(Debug, Clone)]
pub struct HierarchyContext {
    /// Any timeframe's funding sits at an extreme this cycle.
    pub funding_extreme: bool,
    /// Signals gated off across all timeframes.
    pub gated_count: usize,
    /// Share of weighted verdict mass that voted WAIT, in [0, 1].
    pub wait_share: f64,
}

/// Final directional decision before market-state assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDecision {
    pub bias: Bias,
    pub confidence: f64,
    pub direction_confidence: f64,
    pub no_trade_confidence: f64,
    pub trade_stance: TradeStance,
    pub risk_mode: RiskMode,
    pub macro_anchored: bool,
    pub warnings: Vec<String>,
}

/// Apply the ten-step contract.
pub fn decide(
    macro_v: &BucketVerdict,
    micro: &BucketVerdict,
    scalping: &BucketVerdict,
    regime: &RegimeAssessment,
    ctx: &HierarchyContext,
    config: &ConfigParams,
) -> FinalDecision {
    let gates = &config.gates;
    let penalties = &config.penalties;
    let mut warnings: Vec<String> = Vec::new();
    let mut macro_anchored = false;

    // Conflict scores across buckets: the strongest voice per side.
    let side_score = |bias: Bias| -> f64 {
        [macro_v, micro, scalping]
            .iter()
            .filter(|b| b.bias == bias)
            .map(|b| b.confidence)
            .fold(0.0, f64::max)
    };
    let long_score = side_score(Bias::Long);
    let short_score = side_score(Bias::Short);
    let conflict_r = if long_score.max(short_score) > f64::EPSILON {
        long_score.min(short_score) / long_score.max(short_score)
    } else {
        0.0
    };
    let high_conflict = conflict_r > penalties.conflict_ratio;

    // ── 1. Macro permission gate ─────────────────────────────────────────
    let mut bias = Bias::Wait;
    let mut confidence = 0.0f64;

    if macro_v.bias.is_directional() && macro_v.confidence >= gates.macro_permission {
        bias = macro_v.bias;
        confidence = macro_v.confidence;

        // ── 2. Macro anchoring ───────────────────────────────────────────
        if macro_v.confidence >= gates.macro_anchor {
            macro_anchored = true;
            if micro.bias == bias.opposite() || scalping.bias == bias.opposite() {
                warnings.push(MACRO_ANCHOR_WARNING.to_string());
            }
        }

        // ── 3. Setup alignment ───────────────────────────────────────────
        if micro.bias == bias.opposite() {
            if !macro_anchored && micro.confidence >= gates.setup_veto {
                warnings.push(format!(
                    "Micro opposes Macro at confidence {:.1} — setup vetoed",
                    micro.confidence
                ));
                bias = Bias::Wait;
                confidence = 0.0;
            } else {
                confidence -= 1.0;
            }
        } else if micro.bias == bias {
            confidence += 0.5;
        }

        // ── 4. Execution trigger: Scalping moves confidence only ─────────
        if bias.is_directional() {
            if scalping.bias == bias {
                confidence += 0.5;
            } else if scalping.bias == bias.opposite() {
                confidence -= 0.5;
            }
        }

        // ── 5. Conflict penalty ──────────────────────────────────────────
        if bias.is_directional() && high_conflict {
            confidence *= 1.0 - conflict_r * penalties.conflict_penalty_factor;
            warnings.push(format!(
                "Directional conflict r={conflict_r:.2} — confidence penalized"
            ));
        }

        // ── 6. Alignment bonus ───────────────────────────────────────────
        if bias.is_directional()
            && macro_v.bias == bias
            && micro.bias == bias
            && scalping.bias == bias
        {
            confidence += penalties.alignment_bonus;
        }

        confidence = confidence.clamp(0.0, 10.0);
    } else {
        warnings.push(format!(
            "Macro permission not granted (bias {}, confidence {:.1} < {:.1}) — standing aside",
            macro_v.bias, macro_v.confidence, gates.macro_permission
        ));
    }

    // ── 7. Dual confidence ───────────────────────────────────────────────
    let mut no_trade_confidence = ctx.wait_share * 5.0
        + if regime.label.is_avoid() { 3.0 } else { 0.0 }
        + ctx.gated_count as f64 * 0.5
        + if bias == Bias::Wait { 3.0 } else { 0.0 };
    no_trade_confidence = no_trade_confidence.clamp(0.0, 10.0);

    // ── 8. Regime clamp ──────────────────────────────────────────────────
    let regime_avoid = regime.label.is_avoid();
    if regime_avoid {
        confidence = confidence.min(4.0);
    }

    // ── 9. Stance mapping + regime table ─────────────────────────────────
    let mut trade_stance = match bias {
        Bias::Long => TradeStance::LookForLongs,
        Bias::Short => TradeStance::LookForShorts,
        Bias::Wait => TradeStance::AvoidTrading,
    };
    // The regime table refines a directional stance; a WAIT final always
    // stays AVOID_TRADING.
    if bias.is_directional() {
        if let Some(forced) = regime.label.stance_override(bias) {
            if forced != trade_stance {
                warnings.push(format!(
                    "Regime {} forces stance {forced} over {trade_stance}",
                    regime.label
                ));
                trade_stance = forced;
            }
        }
    }
    if regime_avoid {
        trade_stance = TradeStance::AvoidTrading;
    }

    // ── 10. Risk mode ────────────────────────────────────────────────────
    let all_aligned = bias.is_directional()
        && macro_v.bias == bias
        && micro.bias == bias
        && scalping.bias == bias;
    let risk_mode = if ctx.funding_extreme || high_conflict {
        RiskMode::Defensive
    } else if all_aligned && confidence >= 8.0 {
        RiskMode::Aggressive
    } else {
        RiskMode::Normal
    };

    debug!(
        bias = %bias,
        confidence = format!("{confidence:.2}"),
        stance = %trade_stance,
        risk = %risk_mode,
        macro_anchored,
        "hierarchical decision complete"
    );

    FinalDecision {
        bias,
        confidence,
        direction_confidence: confidence,
        no_trade_confidence,
        trade_stance,
        risk_mode,
        macro_anchored,
        warnings,
    }
}
