//! Metric instrument factories for case-claimer.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"case-claimer"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for case-claimer instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("case-claimer")
}

/// Counter: completed poll cycles.
/// Labels: `outcome` ("claim" | "no_claimable" | "all_slots_full" |
/// "recoverable_error" | "interrupted" | "fatal_error").
pub fn cycles() -> Counter<u64> {
    meter()
        .u64_counter("claimer.cycles")
        .with_description("Number of completed poll cycles")
        .build()
}

/// Counter: successful claims.
/// Labels: `category`.
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("claimer.claims")
        .with_description("Number of cases claimed")
        .build()
}

/// Counter: colleague rows written to the activity log.
/// Labels: `status`, trimmed and lowercased (one of the observed statuses).
pub fn observations() -> Counter<u64> {
    meter()
        .u64_counter("claimer.observations")
        .with_description("Number of colleague observations logged")
        .build()
}

/// Counter: rows skipped mid-scan.
/// Labels: `reason` ("not_visible" | "row_stale" | "row_timeout").
pub fn rows_skipped() -> Counter<u64> {
    meter()
        .u64_counter("claimer.rows.skipped")
        .with_description("Number of board rows skipped during a scan")
        .build()
}

/// Counter: errors by taxonomy kind.
/// Labels: `kind`.
pub fn errors() -> Counter<u64> {
    meter()
        .u64_counter("claimer.errors")
        .with_description("Number of errors raised in the claim loop")
        .build()
}

/// Histogram: processing time of one poll cycle, sleep excluded.
pub fn cycle_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("claimer.cycle.duration_ms")
        .with_description("Poll cycle processing time in milliseconds")
        .with_unit("ms")
        .build()
}
