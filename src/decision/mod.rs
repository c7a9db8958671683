// =============================================================================
// Decision Module
// =============================================================================
//
// Turns per-timeframe verdicts into the final directional call:
// - `buckets`   — Macro / Micro / Scalping aggregation
// - `hierarchy` — the three-layer permission contract

pub mod buckets;
pub mod hierarchy;

pub use buckets::{aggregate_bucket, BucketVerdict};
pub use hierarchy::{decide, FinalDecision, HierarchyContext};
