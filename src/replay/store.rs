// =============================================================================
// Replay Store — replay rows and batch records
// =============================================================================
//
// In-memory store mirroring the constraints a persistent backend would
// enforce: unique (batch_id, as_of) per row, and dedup lookups on
// (symbol, as_of, config_version). Batch records carry the full failure log.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::replay::labeler::Outcome;
use crate::replay::{BatchRequest, BatchStatus};
use crate::state::MarketState;
use crate::types::Bias;

/// One per-sample failure inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleFailure {
    pub as_of_ms: i64,
    /// EngineError kind tag.
    pub kind: String,
    pub message: String,
    pub recoverable: bool,
}

/// A replayed state row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRow {
    pub id: String,
    pub batch_id: Option<String>,
    pub as_of_ms: i64,
    pub symbol: String,
    pub config_version: String,
    pub bias: Bias,
    pub confidence: f64,
    pub regime: String,
    pub scenario: String,
    pub bucket_biases: [Bias; 3],
    pub macro_anchored: bool,
    pub warnings: Vec<String>,
    pub state: MarketState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    pub created_at: i64,
}

impl ReplayRow {
    pub fn from_state(state: MarketState, batch_id: Option<String>, created_at: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id,
            as_of_ms: state.timestamp,
            symbol: state.symbol.clone(),
            config_version: state.config_version.clone(),
            bias: state.final_block.bias,
            confidence: state.final_block.confidence,
            regime: state.regime.label.to_string(),
            scenario: state.divergence.scenario.to_string(),
            bucket_biases: [
                state.buckets.macro_bucket.bias,
                state.buckets.micro.bias,
                state.buckets.scalping.bias,
            ],
            macro_anchored: state.final_block.macro_anchored,
            warnings: state.final_block.warnings.clone(),
            state,
            outcome: None,
            created_at,
        }
    }
}

/// Progress record of one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: String,
    pub request: BatchRequest,
    pub status: BatchStatus,
    pub config_version: String,
    pub total_samples: usize,
    pub processed: usize,
    pub skipped_duplicates: usize,
    pub failures: Vec<SampleFailure>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Thread-safe store of replay rows and batch records.
#[derive(Default)]
pub struct ReplayStore {
    rows: RwLock<Vec<ReplayRow>>,
    batches: RwLock<HashMap<String, BatchRecord>>,
}

impl ReplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Rows ─────────────────────────────────────────────────────────────

    /// Insert a row, enforcing unique (batch_id, as_of). Returns false on a
    /// constraint violation (the row is dropped).
    pub fn insert_row(&self, row: ReplayRow) -> bool {
        let mut rows = self.rows.write();
        if let Some(batch_id) = &row.batch_id {
            let clash = rows
                .iter()
                .any(|r| r.batch_id.as_deref() == Some(batch_id) && r.as_of_ms == row.as_of_ms);
            if clash {
                debug!(batch_id, as_of = row.as_of_ms, "duplicate row for batch — dropped");
                return false;
            }
        }
        rows.push(row);
        true
    }

    /// Dedup lookup: does a state already exist for this exact replay key?
    pub fn exists(&self, symbol: &str, as_of_ms: i64, config_version: &str) -> bool {
        self.rows.read().iter().any(|r| {
            r.symbol == symbol && r.as_of_ms == as_of_ms && r.config_version == config_version
        })
    }

    pub fn rows_for_batch(&self, batch_id: &str) -> Vec<ReplayRow> {
        let mut out: Vec<ReplayRow> = self
            .rows
            .read()
            .iter()
            .filter(|r| r.batch_id.as_deref() == Some(batch_id))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.as_of_ms);
        out
    }

    /// Rows without an outcome, or with a PENDING one, for `symbol`.
    pub fn unlabeled_rows(&self, symbol: Option<&str>) -> Vec<ReplayRow> {
        self.rows
            .read()
            .iter()
            .filter(|r| symbol.map_or(true, |s| r.symbol == s))
            .filter(|r| {
                r.outcome
                    .as_ref()
                    .map_or(true, |o| o.label == crate::replay::OutcomeLabel::Pending)
            })
            .cloned()
            .collect()
    }

    pub fn set_outcome(&self, row_id: &str, outcome: Outcome) -> bool {
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|r| r.id == row_id) {
            Some(row) => {
                row.outcome = Some(outcome);
                true
            }
            None => false,
        }
    }

    pub fn labeled_rows(&self) -> Vec<ReplayRow> {
        self.rows
            .read()
            .iter()
            .filter(|r| {
                r.outcome
                    .as_ref()
                    .map_or(false, |o| o.label != crate::replay::OutcomeLabel::Pending)
            })
            .cloned()
            .collect()
    }

    // ── Batches ──────────────────────────────────────────────────────────

    pub fn insert_batch(&self, record: BatchRecord) {
        self.batches.write().insert(record.id.clone(), record);
    }

    pub fn batch(&self, id: &str) -> Option<BatchRecord> {
        self.batches.read().get(id).cloned()
    }

    pub fn update_batch<F: FnOnce(&mut BatchRecord)>(&self, id: &str, f: F) -> bool {
        let mut batches = self.batches.write();
        match batches.get_mut(id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    pub fn delete_batch(&self, id: &str) -> bool {
        let removed = self.batches.write().remove(id).is_some();
        if removed {
            self.rows
                .write()
                .retain(|r| r.batch_id.as_deref() != Some(id));
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::OutcomeLabel;

    fn dummy_state(symbol: &str, as_of: i64, version: &str) -> MarketState {
        use crate::config::{Config, ConfigParams};
        use crate::decision::{BucketVerdict, FinalDecision};
        use crate::divergence::DivergenceAssessment;
        use crate::regime::RegimeAssessment;
        use crate::state::{assemble, AbsorptionSummary, AssemblyInput};
        use crate::types::{Bucket, RiskMode, Timeframe, TradeStance};

        let config = Config {
            version: version.to_string(),
            params: ConfigParams::default(),
            created_at: 0,
            created_by: "test".to_string(),
            notes: String::new(),
        };
        assemble(
            &config,
            AssemblyInput {
                symbol: symbol.to_string(),
                primary_timeframe: Timeframe::H1,
                as_of_ms: as_of,
                last_price: 100.0,
                decision: FinalDecision {
                    bias: Bias::Wait,
                    confidence: 0.0,
                    direction_confidence: 0.0,
                    no_trade_confidence: 5.0,
                    trade_stance: TradeStance::AvoidTrading,
                    risk_mode: RiskMode::Normal,
                    macro_anchored: false,
                    warnings: Vec::new(),
                },
                macro_bucket: BucketVerdict::empty(Bucket::Macro),
                micro: BucketVerdict::empty(Bucket::Micro),
                scalping: BucketVerdict::empty(Bucket::Scalping),
                per_timeframe: Default::default(),
                regime: RegimeAssessment::unclear(),
                divergence: DivergenceAssessment::unclear(0.0, 0.0),
                absorption: AbsorptionSummary::none(),
                staleness_ms: Default::default(),
                extra_warnings: Vec::new(),
            },
        )
    }

    #[test]
    fn unique_batch_timestamp_constraint() {
        let store = ReplayStore::new();
        let state = dummy_state("BTCUSDT", 1_000, "v1");
        let row1 = ReplayRow::from_state(state.clone(), Some("b1".to_string()), 0);
        let row2 = ReplayRow::from_state(state, Some("b1".to_string()), 0);
        assert!(store.insert_row(row1));
        assert!(!store.insert_row(row2));
        assert_eq!(store.rows_for_batch("b1").len(), 1);
    }

    #[test]
    fn dedup_exists_on_symbol_asof_version() {
        let store = ReplayStore::new();
        let row = ReplayRow::from_state(dummy_state("BTCUSDT", 1_000, "v1"), None, 0);
        store.insert_row(row);
        assert!(store.exists("BTCUSDT", 1_000, "v1"));
        assert!(!store.exists("BTCUSDT", 1_000, "v2"));
        assert!(!store.exists("ETHUSDT", 1_000, "v1"));
    }

    #[test]
    fn outcome_updates_move_rows_out_of_unlabeled() {
        let store = ReplayStore::new();
        let row = ReplayRow::from_state(dummy_state("BTCUSDT", 1_000, "v1"), None, 0);
        let id = row.id.clone();
        store.insert_row(row);
        assert_eq!(store.unlabeled_rows(Some("BTCUSDT")).len(), 1);

        let outcome = Outcome {
            label: OutcomeLabel::Continuation,
            horizon_ms: 1,
            move_pct: 1.0,
            mfe: 1.0,
            mae: 0.0,
            labeled_at: 2_000,
        };
        assert!(store.set_outcome(&id, outcome));
        assert!(store.unlabeled_rows(Some("BTCUSDT")).is_empty());
        assert_eq!(store.labeled_rows().len(), 1);
    }

    #[test]
    fn delete_batch_removes_rows() {
        let store = ReplayStore::new();
        let row = ReplayRow::from_state(dummy_state("BTCUSDT", 1_000, "v1"), Some("b1".to_string()), 0);
        store.insert_row(row);
        store.insert_batch(BatchRecord {
            id: "b1".to_string(),
            request: BatchRequest {
                symbol: "BTCUSDT".to_string(),
                start_time: 0,
                end_time: 10,
                step: crate::types::Timeframe::H1,
                max_samples: 10,
                primary_timeframe: crate::types::Timeframe::H1,
                horizon_ms: None,
                skip_duplicate_check: false,
            },
            status: BatchStatus::Completed,
            config_version: "v1".to_string(),
            total_samples: 1,
            processed: 1,
            skipped_duplicates: 0,
            failures: Vec::new(),
            created_at: 0,
            finished_at: Some(1),
            failure_reason: None,
        });

        assert!(store.delete_batch("b1"));
        assert!(store.rows_for_batch("b1").is_empty());
        assert!(store.batch("b1").is_none());
    }
}
