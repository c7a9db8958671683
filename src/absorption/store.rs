// =============================================================================
// Absorption Event Store — unique-open constraint across cycles
// =============================================================================
//
// In-memory store with the same invariant a persistent backend would enforce
// with a unique partial index: at most one unresolved event per
// (symbol, timeframe, cvd_direction). A duplicate open insert is a benign
// no-op; an opposite-direction detection invalidates the prior event and
// opens the new one.

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::absorption::{AbsorptionEvent, CvdDirection, Resolution, ResolutionCriteria};

/// Result of inserting a detection.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// A new event was opened.
    Opened,
    /// Same-direction unresolved event already exists; nothing changed.
    DuplicateNoOp,
    /// An opposite-direction event was invalidated, then the new one opened.
    InvalidatedPrior { prior_id: String },
}

/// Thread-safe store of all absorption events, open and resolved.
#[derive(Default)]
pub struct AbsorptionStore {
    events: RwLock<Vec<AbsorptionEvent>>,
}

impl AbsorptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a Phase-1 detection, enforcing the unique-open constraint.
    pub fn insert_detection(&self, event: AbsorptionEvent) -> DetectionOutcome {
        let mut events = self.events.write();

        let same_open = events.iter().any(|e| {
            !e.is_resolved()
                && e.symbol == event.symbol
                && e.timeframe == event.timeframe
                && e.cvd_direction == event.cvd_direction
        });
        if same_open {
            debug!(
                symbol = %event.symbol,
                tf = %event.timeframe,
                direction = %event.cvd_direction,
                "duplicate absorption detection — no-op"
            );
            return DetectionOutcome::DuplicateNoOp;
        }

        let mut invalidated: Option<String> = None;
        for e in events.iter_mut() {
            if !e.is_resolved()
                && e.symbol == event.symbol
                && e.timeframe == event.timeframe
                && e.cvd_direction == event.cvd_direction.opposite()
            {
                e.resolved_at = Some(event.detected_at);
                e.resolution = Some(Resolution::Invalidated);
                e.resolution_reason =
                    Some("opposite-direction absorption detected".to_string());
                invalidated = Some(e.id.clone());
                info!(
                    prior_id = %e.id,
                    symbol = %event.symbol,
                    tf = %event.timeframe,
                    "absorption event invalidated by opposite detection"
                );
            }
        }

        info!(
            id = %event.id,
            symbol = %event.symbol,
            tf = %event.timeframe,
            direction = %event.cvd_direction,
            location = ?event.location,
            "absorption event opened"
        );
        events.push(event);

        match invalidated {
            Some(prior_id) => DetectionOutcome::InvalidatedPrior { prior_id },
            None => DetectionOutcome::Opened,
        }
    }

    /// All unresolved events, optionally filtered by symbol.
    pub fn unresolved(&self, symbol: Option<&str>) -> Vec<AbsorptionEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| !e.is_resolved() && symbol.map_or(true, |s| e.symbol == s))
            .cloned()
            .collect()
    }

    /// Mark an event resolved. Returns the updated event.
    pub fn resolve(
        &self,
        id: &str,
        resolution: Resolution,
        reason: String,
        criteria: Option<ResolutionCriteria>,
        at_ms: i64,
    ) -> Option<AbsorptionEvent> {
        let mut events = self.events.write();
        let event = events.iter_mut().find(|e| e.id == id && !e.is_resolved())?;
        event.resolved_at = Some(at_ms);
        event.resolution = Some(resolution);
        event.resolution_reason = Some(reason);
        event.resolution_criteria = criteria;
        info!(id = %event.id, resolution = ?resolution, "absorption event resolved");
        Some(event.clone())
    }

    /// Record a consumed data-gap extension.
    pub fn mark_extended(&self, id: &str) {
        let mut events = self.events.write();
        if let Some(event) = events.iter_mut().find(|e| e.id == id && !e.is_resolved()) {
            event.extensions_used = 1;
        }
    }

    /// Events of `symbol` resolved at or after `since_ms`, newest first.
    pub fn resolved_since(&self, symbol: &str, since_ms: i64) -> Vec<AbsorptionEvent> {
        let mut out: Vec<AbsorptionEvent> = self
            .events
            .read()
            .iter()
            .filter(|e| e.symbol == symbol && e.resolved_at.map_or(false, |t| t >= since_ms))
            .cloned()
            .collect();
        out.sort_by_key(|e| std::cmp::Reverse(e.resolved_at));
        out
    }

    pub fn all(&self) -> Vec<AbsorptionEvent> {
        self.events.read().clone()
    }
}
