// =============================================================================
// Replay Module
// =============================================================================
//
// Deterministic reproduction of the pipeline at historical timestamps plus
// outcome labeling for calibration:
// - `orchestrator` — batch lifecycle (pause/resume/abort), dedup, pacing
// - `labeler`      — CONTINUATION / REVERSAL / NOISE / PENDING assignment
// - `store`        — replay rows and batch records with unique constraints
// - `scoreboard`   — hit-rate aggregation over labeled states

pub mod labeler;
pub mod orchestrator;
pub mod scoreboard;
pub mod store;

pub use labeler::{label_outcome, Outcome, OutcomeLabel};
pub use orchestrator::ReplayOrchestrator;
pub use store::{BatchRecord, ReplayRow, ReplayStore, SampleFailure};

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::types::Timeframe;

/// Batch lifecycle. PENDING -> RUNNING <-> PAUSED -> COMPLETED | FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// Consecutive fatal sample failures that stop a batch.
pub const MAX_CONSECUTIVE_FATAL: usize = 5;

/// Hard cap on samples per batch.
pub const MAX_SAMPLES: usize = 200;

/// A batch request as received from the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub symbol: String,
    pub start_time: i64,
    pub end_time: i64,
    /// Spacing between as-of samples; only 30m, 1h, and 4h are allowed.
    pub step: Timeframe,
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Primary timeframe each sample is analyzed on.
    #[serde(default = "default_primary_timeframe")]
    pub primary_timeframe: Timeframe,
    /// Override the labeling horizon; defaults to the config's per-bucket one.
    #[serde(default)]
    pub horizon_ms: Option<i64>,
    #[serde(default)]
    pub skip_duplicate_check: bool,
}

fn default_max_samples() -> usize {
    MAX_SAMPLES
}

fn default_primary_timeframe() -> Timeframe {
    Timeframe::H1
}

impl BatchRequest {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !matches!(self.step, Timeframe::M30 | Timeframe::H1 | Timeframe::H4) {
            return Err(EngineError::ValidationFailure(format!(
                "step {} not allowed (use 30m, 1h, or 4h)",
                self.step
            )));
        }
        if self.start_time >= self.end_time {
            return Err(EngineError::ValidationFailure(
                "start_time must precede end_time".to_string(),
            ));
        }
        if self.max_samples == 0 || self.max_samples > MAX_SAMPLES {
            return Err(EngineError::ValidationFailure(format!(
                "max_samples must be in 1..={MAX_SAMPLES}"
            )));
        }
        if self.symbol.trim().is_empty() {
            return Err(EngineError::ValidationFailure("symbol is required".to_string()));
        }
        Ok(())
    }

    /// The deterministic, strictly-increasing sample timestamps: step-aligned
    /// boundaries inside [start_time, end_time], capped at `max_samples`.
    pub fn sample_timestamps(&self) -> Vec<i64> {
        let step_ms = self.step.interval_ms();
        let mut t = crate::time_align::align_start_to_boundary(self.step, self.start_time);
        if t < self.start_time {
            t += step_ms;
        }
        let mut out = Vec::new();
        while t <= self.end_time && out.len() < self.max_samples {
            out.push(t);
            t += step_ms;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_timestamps_are_aligned_and_increasing() {
        let step = Timeframe::H1.interval_ms();
        let req = BatchRequest {
            symbol: "BTCUSDT".to_string(),
            start_time: 10 * step + 1,
            end_time: 20 * step,
            step: Timeframe::H1,
            max_samples: MAX_SAMPLES,
            primary_timeframe: Timeframe::H1,
            horizon_ms: None,
            skip_duplicate_check: false,
        };
        let ts = req.sample_timestamps();
        assert_eq!(ts.first(), Some(&(11 * step)));
        assert_eq!(ts.last(), Some(&(20 * step)));
        assert!(ts.windows(2).all(|w| w[1] - w[0] == step));
    }

    #[test]
    fn max_samples_caps_the_list() {
        let step = Timeframe::M30.interval_ms();
        let req = BatchRequest {
            symbol: "BTCUSDT".to_string(),
            start_time: 0,
            end_time: 1_000 * step,
            step: Timeframe::M30,
            max_samples: 10,
            primary_timeframe: Timeframe::H1,
            horizon_ms: None,
            skip_duplicate_check: false,
        };
        assert_eq!(req.sample_timestamps().len(), 10);
    }

    #[test]
    fn daily_step_is_rejected() {
        let req = BatchRequest {
            symbol: "BTCUSDT".to_string(),
            start_time: 0,
            end_time: 1,
            step: Timeframe::D1,
            max_samples: 10,
            primary_timeframe: Timeframe::H1,
            horizon_ms: None,
            skip_duplicate_check: false,
        };
        assert!(req.validate().is_err());
    }
}
