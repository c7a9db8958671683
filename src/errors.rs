// =============================================================================
// Error taxonomy for the Meridian pipeline
// =============================================================================
//
// Degraded-but-valid outcomes (Unreliable, recoverable InsufficientData) flow
// through normal code paths as gated signals with warnings; only the kinds
// marked fatal abort a sample or a batch.

use thiserror::Error;

/// Every failure the core can produce, classified by kind.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The data provider returned fewer candles than the minimum required.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Data is present but fails a reliability gate. Degraded, not fatal.
    #[error("unreliable data: {0}")]
    Unreliable(String),

    /// A candle's close falls after the as-of cutoff. Fatal for the sample —
    /// this indicates a bug upstream, never tolerated silently.
    #[error("lookahead violation: {0}")]
    Lookahead(String),

    /// Upstream returned HTTP 429. Retried internally after cooldown.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// External call exceeded its budget.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Config write raced a newer version.
    #[error("config version conflict: active is {current}, write based on {based_on} — refresh required")]
    VersionConflict { current: String, based_on: String },

    /// Proposed config violates structural or bounded-delta rules.
    #[error("config validation failed: {0}")]
    ValidationFailure(String),

    /// Interval outside the supported closed set.
    #[error("unknown interval: {0}")]
    UnknownInterval(String),

    /// Irrecoverable failure (storage unreachable, invariant broken).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    /// Stable machine-readable kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientData(_) => "InsufficientData",
            Self::Unreliable(_) => "Unreliable",
            Self::Lookahead(_) => "Lookahead",
            Self::RateLimited(_) => "RateLimited",
            Self::Timeout(_) => "Timeout",
            Self::VersionConflict { .. } => "VersionConflict",
            Self::ValidationFailure(_) => "ValidationFailure",
            Self::UnknownInterval(_) => "UnknownInterval",
            Self::Fatal(_) => "Fatal",
        }
    }

    /// Whether a replay sample hitting this error may be recorded and skipped
    /// without terminating the batch.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData(_)
                | Self::Unreliable(_)
                | Self::RateLimited(_)
                | Self::Timeout(_)
        )
    }
}
