//! Poll cycle span helpers.
//!
//! Provides span creation for one coordinator cycle and state-transition
//! recording for the engine lifecycle.

use tracing::Span;
use uuid::Uuid;

/// Start a span for one poll cycle.
///
/// `cycle.outcome` is declared empty and filled in when the cycle ends.
pub fn start_cycle_span(run_id: &Uuid, cycle: u64) -> Span {
    tracing::info_span!(
        "claimer.cycle",
        "run.id" = %run_id,
        "cycle.number" = cycle,
        "cycle.outcome" = tracing::field::Empty,
    )
}

/// Record the cycle's outcome on its span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("cycle.outcome", outcome);
}

/// Record an engine state transition as an event scoped to `span`.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
