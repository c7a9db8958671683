// =============================================================================
// Replay Orchestrator — batches of historical pipeline runs
// =============================================================================
//
// Runs the exact pipeline at past instants. Every sample's data fetches are
// clamped to `align_end_to_last_closed(interval, as_of)` inside the
// pipeline, so replay and live share one code path and one no-lookahead
// rule. Batches are cooperative: pause/abort flags are honoured between
// samples; resume continues at the next unprocessed timestamp because rows
// already written are deduplicated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::ConfigStore;
use crate::errors::EngineError;
use crate::market_data::DataProvider;
use crate::pipeline::Pipeline;
use crate::replay::labeler::label_outcome;
use crate::replay::store::{BatchRecord, ReplayRow, ReplayStore, SampleFailure};
use crate::replay::{BatchRequest, BatchStatus, MAX_CONSECUTIVE_FATAL};
use crate::types::{Bucket, Timeframe};

/// Cooperative control flags for one running batch.
struct BatchControl {
    paused: AtomicBool,
    aborted: AtomicBool,
}

/// Orchestrates single replays, batches, and outcome labeling.
pub struct ReplayOrchestrator {
    pipeline: Arc<Pipeline>,
    config_store: Arc<ConfigStore>,
    store: Arc<ReplayStore>,
    provider: Arc<dyn DataProvider>,
    controls: RwLock<HashMap<String, Arc<BatchControl>>>,
    /// Inter-sample pacing in ms (rate courtesy toward the data provider).
    pace_ms: u64,
}

impl ReplayOrchestrator {
    pub fn new(
        pipeline: Arc<Pipeline>,
        config_store: Arc<ConfigStore>,
        store: Arc<ReplayStore>,
        provider: Arc<dyn DataProvider>,
    ) -> Arc<Self> {
        Self::with_pace_ms(pipeline, config_store, store, provider, 200)
    }

    pub fn with_pace_ms(
        pipeline: Arc<Pipeline>,
        config_store: Arc<ConfigStore>,
        store: Arc<ReplayStore>,
        provider: Arc<dyn DataProvider>,
        pace_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            config_store,
            store,
            provider,
            controls: RwLock::new(HashMap::new()),
            pace_ms,
        })
    }

    pub fn store(&self) -> Arc<ReplayStore> {
        self.store.clone()
    }

    // -------------------------------------------------------------------------
    // Single replay
    // -------------------------------------------------------------------------

    /// Replay one timestamp outside any batch.
    pub async fn run_single(
        &self,
        symbol: &str,
        primary_timeframe: Timeframe,
        as_of_ms: i64,
        skip_duplicate_check: bool,
    ) -> Result<ReplayRow, EngineError> {
        let config = self.config_store.active();
        if !skip_duplicate_check && self.store.exists(symbol, as_of_ms, &config.version) {
            return Err(EngineError::ValidationFailure(format!(
                "replay state already exists for {symbol}@{as_of_ms} under {}",
                config.version
            )));
        }

        let state = self
            .pipeline
            .run(config, symbol, primary_timeframe, as_of_ms, true)
            .await?;
        let row = ReplayRow::from_state(state, None, chrono::Utc::now().timestamp_millis());
        self.store.insert_row(row.clone());
        Ok(row)
    }

    // -------------------------------------------------------------------------
    // Batch lifecycle
    // -------------------------------------------------------------------------

    /// Validate and launch a batch; returns its id immediately.
    pub fn start_batch(self: &Arc<Self>, request: BatchRequest) -> Result<String, EngineError> {
        request.validate()?;
        let timestamps = request.sample_timestamps();
        if timestamps.is_empty() {
            return Err(EngineError::ValidationFailure(
                "no step-aligned timestamps inside the requested range".to_string(),
            ));
        }

        let batch_id = uuid::Uuid::new_v4().to_string();
        let config_version = self.config_store.active().version.clone();
        self.store.insert_batch(BatchRecord {
            id: batch_id.clone(),
            request: request.clone(),
            status: BatchStatus::Pending,
            config_version,
            total_samples: timestamps.len(),
            processed: 0,
            skipped_duplicates: 0,
            failures: Vec::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
            finished_at: None,
            failure_reason: None,
        });

        let control = Arc::new(BatchControl {
            paused: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        });
        self.controls.write().insert(batch_id.clone(), control);

        let orchestrator = self.clone();
        let id = batch_id.clone();
        tokio::spawn(async move {
            orchestrator.run_batch(id, request, timestamps).await;
        });

        info!(batch_id = %batch_id, "replay batch launched");
        Ok(batch_id)
    }

    async fn run_batch(self: Arc<Self>, batch_id: String, request: BatchRequest, timestamps: Vec<i64>) {
        // One config snapshot for the whole batch.
        let config = self.config_store.active();
        self.store
            .update_batch(&batch_id, |b| b.status = BatchStatus::Running);

        let control = self
            .controls
            .read()
            .get(&batch_id)
            .cloned()
            .expect("control registered at start");

        let mut consecutive_fatal = 0usize;

        for &as_of in &timestamps {
            // ── Cooperative pause / abort between samples ────────────────
            loop {
                if control.aborted.load(Ordering::SeqCst) {
                    self.finish(&batch_id, BatchStatus::Failed, Some("aborted".to_string()));
                    return;
                }
                if !control.paused.load(Ordering::SeqCst) {
                    break;
                }
                self.store
                    .update_batch(&batch_id, |b| b.status = BatchStatus::Paused);
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            self.store
                .update_batch(&batch_id, |b| b.status = BatchStatus::Running);

            // ── Dedup ────────────────────────────────────────────────────
            if !request.skip_duplicate_check
                && self.store.exists(&request.symbol, as_of, &config.version)
            {
                self.store
                    .update_batch(&batch_id, |b| b.skipped_duplicates += 1);
                continue;
            }

            // ── Run the sample ───────────────────────────────────────────
            match self
                .pipeline
                .run(
                    config.clone(),
                    &request.symbol,
                    request.primary_timeframe,
                    as_of,
                    true,
                )
                .await
            {
                Ok(state) => {
                    let row = ReplayRow::from_state(
                        state,
                        Some(batch_id.clone()),
                        chrono::Utc::now().timestamp_millis(),
                    );
                    self.store.insert_row(row);
                    self.store.update_batch(&batch_id, |b| b.processed += 1);
                    consecutive_fatal = 0;
                }
                Err(e) => {
                    let recoverable = e.is_recoverable();
                    warn!(batch_id = %batch_id, as_of, error = %e, "replay sample failed");
                    self.store.update_batch(&batch_id, |b| {
                        b.failures.push(SampleFailure {
                            as_of_ms: as_of,
                            kind: e.kind().to_string(),
                            message: e.to_string(),
                            recoverable,
                        });
                    });
                    if recoverable {
                        consecutive_fatal = 0;
                    } else {
                        consecutive_fatal += 1;
                        if consecutive_fatal >= MAX_CONSECUTIVE_FATAL {
                            self.finish(
                                &batch_id,
                                BatchStatus::Failed,
                                Some(format!(
                                    "{consecutive_fatal} consecutive fatal sample failures"
                                )),
                            );
                            return;
                        }
                    }
                }
            }

            if self.pace_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.pace_ms)).await;
            }
        }

        self.finish(&batch_id, BatchStatus::Completed, None);
    }

    fn finish(&self, batch_id: &str, status: BatchStatus, reason: Option<String>) {
        self.store.update_batch(batch_id, |b| {
            b.status = status;
            b.finished_at = Some(chrono::Utc::now().timestamp_millis());
            b.failure_reason = reason.clone();
        });
        self.controls.write().remove(batch_id);
        info!(batch_id, status = %status, "replay batch finished");
    }

    pub fn pause(&self, batch_id: &str) -> bool {
        match self.controls.read().get(batch_id) {
            Some(c) => {
                c.paused.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn resume(&self, batch_id: &str) -> bool {
        match self.controls.read().get(batch_id) {
            Some(c) => {
                c.paused.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Abort a running batch (if any) and delete its record and rows.
    pub fn delete_batch(&self, batch_id: &str) -> bool {
        if let Some(c) = self.controls.read().get(batch_id) {
            c.aborted.store(true, Ordering::SeqCst);
            c.paused.store(false, Ordering::SeqCst);
        }
        self.store.delete_batch(batch_id)
    }

    pub fn status(&self, batch_id: &str) -> Option<BatchRecord> {
        self.store.batch(batch_id)
    }

    /// Wait until a batch reaches a terminal status (test helper and a
    /// convenience for synchronous callers).
    pub async fn wait_until_done(&self, batch_id: &str) -> Option<BatchRecord> {
        loop {
            let record = self.store.batch(batch_id)?;
            match record.status {
                BatchStatus::Completed | BatchStatus::Failed => return Some(record),
                _ => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            }
        }
    }

    // -------------------------------------------------------------------------
    // Outcome labeling
    // -------------------------------------------------------------------------

    /// Label every unlabeled (or still-PENDING) row for `symbol` using
    /// future prices from the provider. Returns the number of rows whose
    /// outcome was updated.
    pub async fn label_rows(
        &self,
        symbol: Option<&str>,
        horizon_override_ms: Option<i64>,
    ) -> Result<usize, EngineError> {
        let config = self.config_store.active();
        let params = &config.params;
        let retail = params.divergence.retail_exchange;
        let threshold = params.outcome.move_threshold_pct;

        let mut updated = 0usize;
        for row in self.store.unlabeled_rows(symbol) {
            let tf = row.state.primary_timeframe;
            let interval = tf.interval_ms();
            let horizon_ms = horizon_override_ms
                .unwrap_or_else(|| params.horizon_for(Bucket::Micro).default_ms);

            let end = row.as_of_ms + horizon_ms + interval;
            let limit = (horizon_ms / interval + 4).max(8) as usize;
            let future = self
                .provider
                .get_price_history(retail, &row.symbol, tf, limit, Some(row.as_of_ms), Some(end))
                .await?;

            let outcome = label_outcome(
                row.bias,
                row.state.last_price,
                row.as_of_ms,
                horizon_ms,
                &future,
                interval,
                threshold,
                chrono::Utc::now().timestamp_millis(),
            );
            if self.store.set_outcome(&row.id, outcome) {
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::absorption::AbsorptionStore;
    use crate::market_data::demo::DemoProvider;
    use crate::replay::OutcomeLabel;

    const STEP: i64 = 3_600_000;
    const START: i64 = 1_765_000_800_000; // aligned hour in Dec 2025
    fn orchestrator() -> Arc<ReplayOrchestrator> {
        let provider: Arc<dyn DataProvider> = Arc::new(DemoProvider::new());
        let pipeline = Arc::new(Pipeline::new(provider.clone(), Arc::new(AbsorptionStore::new())));
        let config_store = Arc::new(ConfigStore::with_defaults());
        let store = Arc::new(ReplayStore::new());
        ReplayOrchestrator::with_pace_ms(pipeline, config_store, store, provider, 0)
    }

    fn request(samples: usize) -> BatchRequest {
        BatchRequest {
            symbol: "BTCUSDT".to_string(),
            start_time: START,
            end_time: START + (samples as i64 - 1) * STEP,
            step: Timeframe::H1,
            max_samples: samples,
            primary_timeframe: Timeframe::H1,
            horizon_ms: None,
            skip_duplicate_check: false,
        }
    }

    #[tokio::test]
    async fn batch_runs_to_completion() {
        let orch = orchestrator();
        let id = orch.start_batch(request(5)).unwrap();
        let record = orch.wait_until_done(&id).await.unwrap();
        assert_eq!(record.status, BatchStatus::Completed);
        assert_eq!(record.processed, 5);
        assert!(record.failures.is_empty());

        let rows = orch.store().rows_for_batch(&id);
        assert_eq!(rows.len(), 5);
        assert!(rows.windows(2).all(|w| w[0].as_of_ms < w[1].as_of_ms));
    }

    #[tokio::test]
    async fn second_batch_deduplicates_same_range() {
        let orch = orchestrator();
        let id1 = orch.start_batch(request(4)).unwrap();
        orch.wait_until_done(&id1).await.unwrap();

        let id2 = orch.start_batch(request(4)).unwrap();
        let record = orch.wait_until_done(&id2).await.unwrap();
        assert_eq!(record.status, BatchStatus::Completed);
        assert_eq!(record.processed, 0);
        assert_eq!(record.skipped_duplicates, 4);
    }

    #[tokio::test]
    async fn skip_duplicate_check_reprocesses() {
        let orch = orchestrator();
        let id1 = orch.start_batch(request(3)).unwrap();
        orch.wait_until_done(&id1).await.unwrap();

        let mut req = request(3);
        req.skip_duplicate_check = true;
        let id2 = orch.start_batch(req).unwrap();
        let record = orch.wait_until_done(&id2).await.unwrap();
        assert_eq!(record.processed, 3);
    }

    #[tokio::test]
    async fn single_replay_dedup_and_override() {
        let orch = orchestrator();
        let row = orch
            .run_single("BTCUSDT", Timeframe::H1, START, false)
            .await
            .unwrap();
        assert_eq!(row.as_of_ms, START);

        let err = orch
            .run_single("BTCUSDT", Timeframe::H1, START, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationFailure");

        // Explicit override reprocesses.
        orch.run_single("BTCUSDT", Timeframe::H1, START, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_provider_records_recoverable_failures() {
        let provider: Arc<dyn DataProvider> = Arc::new(crate::market_data::HistoricalStore::new());
        let pipeline = Arc::new(Pipeline::new(provider.clone(), Arc::new(AbsorptionStore::new())));
        let config_store = Arc::new(ConfigStore::with_defaults());
        let store = Arc::new(ReplayStore::new());
        let orch = ReplayOrchestrator::with_pace_ms(pipeline, config_store, store, provider, 0);

        let id = orch.start_batch(request(8)).unwrap();
        let record = orch.wait_until_done(&id).await.unwrap();
        // InsufficientData is recoverable: every sample fails, batch completes.
        assert_eq!(record.status, BatchStatus::Completed);
        assert_eq!(record.processed, 0);
        assert_eq!(record.failures.len(), 8);
        assert!(record.failures.iter().all(|f| f.kind == "InsufficientData"));
    }

    #[tokio::test]
    async fn labeling_after_batch_produces_outcomes() {
        let orch = orchestrator();
        let id = orch.start_batch(request(3)).unwrap();
        orch.wait_until_done(&id).await.unwrap();

        let updated = orch.label_rows(Some("BTCUSDT"), Some(4 * STEP)).await.unwrap();
        assert_eq!(updated, 3);

        for row in orch.store().rows_for_batch(&id) {
            let outcome = row.outcome.expect("labeled");
            // Demo data extends arbitrarily far: nothing stays pending.
            assert_ne!(outcome.label, OutcomeLabel::Pending);
        }
    }

    #[tokio::test]
    async fn pause_and_resume_roundtrip() {
        let provider: Arc<dyn DataProvider> = Arc::new(DemoProvider::new());
        let pipeline = Arc::new(Pipeline::new(provider.clone(), Arc::new(AbsorptionStore::new())));
        let config_store = Arc::new(ConfigStore::with_defaults());
        let store = Arc::new(ReplayStore::new());
        // Slow pacing so the batch is still running when we pause it.
        let orch = ReplayOrchestrator::with_pace_ms(pipeline, config_store, store, provider, 30);

        let id = orch.start_batch(request(6)).unwrap();
        assert!(orch.pause(&id));
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        let paused_processed = orch.status(&id).unwrap().processed;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        // No progress while paused.
        assert_eq!(orch.status(&id).unwrap().processed, paused_processed);

        assert!(orch.resume(&id));
        let record = orch.wait_until_done(&id).await.unwrap();
        assert_eq!(record.status, BatchStatus::Completed);
        assert_eq!(record.processed, 6);
    }

    #[tokio::test]
    async fn delete_aborts_and_removes() {
        let provider: Arc<dyn DataProvider> = Arc::new(DemoProvider::new());
        let pipeline = Arc::new(Pipeline::new(provider.clone(), Arc::new(AbsorptionStore::new())));
        let config_store = Arc::new(ConfigStore::with_defaults());
        let store = Arc::new(ReplayStore::new());
        let orch = ReplayOrchestrator::with_pace_ms(pipeline, config_store, store, provider, 30);

        let id = orch.start_batch(request(8)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(orch.delete_batch(&id));
        assert!(orch.status(&id).is_none());
    }
}
