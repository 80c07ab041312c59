//! Business metrics for the check-in validator.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `gatecheck_scans_total{outcome}` - Validations by outcome kind
//! - `gatecheck_check_in_conflicts_total` - Check-ins lost to a concurrent scan of the same ticket
//!
//! ## Histograms
//! - `gatecheck_validation_duration_seconds` - Time from decoded code to classified outcome

use crate::engine::OutcomeKind;
use metrics::{describe_counter, describe_histogram};

/// Initialize and register all metric descriptions.
///
/// Call once at start-up, before any metrics are recorded.
pub fn register_checkpoint_metrics() {
    describe_counter!(
        "gatecheck_scans_total",
        "Total number of validations by outcome (admitted, already_used, revoked, not_found, unknown_status, system_error)"
    );
    describe_counter!(
        "gatecheck_check_in_conflicts_total",
        "Check-ins whose conditional update lost to a concurrent scan"
    );
    describe_histogram!(
        "gatecheck_validation_duration_seconds",
        "Time taken to validate one scanned code"
    );

    // Store runtime
    describe_counter!("store.commands.total", "Actions sent to the checkpoint store");
    describe_counter!("store.effects.executed", "Effects executed by type");

    tracing::info!("Checkpoint metrics registered");
}

/// Record a finished validation.
pub fn record_scan(kind: OutcomeKind, duration_secs: f64) {
    metrics::counter!("gatecheck_scans_total", "outcome" => kind.metric_label()).increment(1);
    metrics::histogram!("gatecheck_validation_duration_seconds").record(duration_secs);
    tracing::debug!(outcome = kind.metric_label(), duration_secs, "Recorded scan metric");
}

/// Record a conditional update that found the ticket no longer `VALID`.
pub fn record_check_in_conflict() {
    metrics::counter!("gatecheck_check_in_conflicts_total").increment(1);
}
