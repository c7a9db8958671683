// =============================================================================
// Scoreboard — hit rates over labeled replay states
// =============================================================================
//
// Aggregates labeled rows into per-dimension tallies (regime, divergence
// scenario, final bias). A CONTINUATION is a hit for any bias — for WAIT
// states the labeler already encodes "WAIT was right" as CONTINUATION.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::replay::store::ReplayRow;
use crate::replay::OutcomeLabel;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub total: usize,
    pub continuation: usize,
    pub reversal: usize,
    pub noise: usize,
    /// continuation / (continuation + reversal); noise excluded.
    pub hit_rate: f64,
    pub avg_move_pct: f64,
    pub avg_mfe: f64,
    pub avg_mae: f64,
}

impl Tally {
    fn add(&mut self, row: &ReplayRow) {
        let outcome = match &row.outcome {
            Some(o) => o,
            None => return,
        };
        self.total += 1;
        match outcome.label {
            OutcomeLabel::Continuation => self.continuation += 1,
            OutcomeLabel::Reversal => self.reversal += 1,
            OutcomeLabel::Noise => self.noise += 1,
            OutcomeLabel::Pending => {}
        }
        self.avg_move_pct += outcome.move_pct;
        self.avg_mfe += outcome.mfe;
        self.avg_mae += outcome.mae;
    }

    fn finalize(&mut self) {
        let decided = self.continuation + self.reversal;
        self.hit_rate = if decided > 0 {
            self.continuation as f64 / decided as f64
        } else {
            0.0
        };
        if self.total > 0 {
            self.avg_move_pct /= self.total as f64;
            self.avg_mfe /= self.total as f64;
            self.avg_mae /= self.total as f64;
        }
    }
}

/// The scoreboard payload served by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scoreboard {
    pub overall: Tally,
    pub by_regime: BTreeMap<String, Tally>,
    pub by_scenario: BTreeMap<String, Tally>,
    pub by_bias: BTreeMap<String, Tally>,
    pub labeled_states: usize,
}

/// Build the scoreboard from labeled rows.
pub fn build(rows: &[ReplayRow]) -> Scoreboard {
    let mut board = Scoreboard {
        labeled_states: rows.len(),
        ..Default::default()
    };

    for row in rows {
        board.overall.add(row);
        board.by_regime.entry(row.regime.clone()).or_default().add(row);
        board
            .by_scenario
            .entry(row.scenario.clone())
            .or_default()
            .add(row);
        board
            .by_bias
            .entry(row.bias.to_string())
            .or_default()
            .add(row);
    }

    board.overall.finalize();
    for tally in board.by_regime.values_mut() {
        tally.finalize();
    }
    for tally in board.by_scenario.values_mut() {
        tally.finalize();
    }
    for tally in board.by_bias.values_mut() {
        tally.finalize();
    }
    board
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::labeler::Outcome;

    fn dummy_state(bias: crate::types::Bias) -> crate::state::MarketState {
        use crate::decision::{BucketVerdict, FinalDecision};
        use crate::state::{assemble, AbsorptionSummary, AssemblyInput};
        use crate::types::{Bucket, RiskMode, Timeframe, TradeStance};

        let config = crate::config::Config {
            version: "v1".to_string(),
            params: crate::config::ConfigParams::default(),
            created_at: 0,
            created_by: "test".to_string(),
            notes: String::new(),
        };
        assemble(
            &config,
            AssemblyInput {
                symbol: "BTCUSDT".to_string(),
                primary_timeframe: Timeframe::H1,
                as_of_ms: 0,
                last_price: 100.0,
                decision: FinalDecision {
                    bias,
                    confidence: 5.0,
                    direction_confidence: 5.0,
                    no_trade_confidence: 2.0,
                    trade_stance: TradeStance::AvoidTrading,
                    risk_mode: RiskMode::Normal,
                    macro_anchored: false,
                    warnings: Vec::new(),
                },
                macro_bucket: BucketVerdict::empty(Bucket::Macro),
                micro: BucketVerdict::empty(Bucket::Micro),
                scalping: BucketVerdict::empty(Bucket::Scalping),
                per_timeframe: Default::default(),
                regime: crate::regime::RegimeAssessment::unclear(),
                divergence: crate::divergence::DivergenceAssessment::unclear(0.0, 0.0),
                absorption: AbsorptionSummary::none(),
                staleness_ms: Default::default(),
                extra_warnings: Vec::new(),
            },
        )
    }

    fn row(regime: &str, bias: crate::types::Bias, label: OutcomeLabel, move_pct: f64) -> ReplayRow {
        let mut r = ReplayRow {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: None,
            as_of_ms: 0,
            symbol: "BTCUSDT".to_string(),
            config_version: "v1".to_string(),
            bias,
            confidence: 5.0,
            regime: regime.to_string(),
            scenario: "unclear".to_string(),
            bucket_biases: [bias, bias, bias],
            macro_anchored: false,
            warnings: Vec::new(),
            state: dummy_state(bias),
            outcome: None,
            created_at: 0,
        };
        r.outcome = Some(Outcome {
            label,
            horizon_ms: 1,
            move_pct,
            mfe: move_pct.max(0.0),
            mae: move_pct.min(0.0),
            labeled_at: 0,
        });
        r
    }

    #[test]
    fn hit_rate_excludes_noise() {
        use crate::types::Bias;
        let rows = vec![
            row("healthy_bull", Bias::Long, OutcomeLabel::Continuation, 1.0),
            row("healthy_bull", Bias::Long, OutcomeLabel::Continuation, 0.8),
            row("healthy_bull", Bias::Long, OutcomeLabel::Reversal, -1.0),
            row("healthy_bull", Bias::Long, OutcomeLabel::Noise, 0.1),
        ];
        let board = build(&rows);
        let tally = &board.by_regime["healthy_bull"];
        assert_eq!(tally.total, 4);
        assert!((tally.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(board.overall.noise, 1);
    }
}
