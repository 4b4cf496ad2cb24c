//! Ledger metrics.
//!
//! Counters for operation outcomes, CAS contention, and bulk scan results.
//! These complement the structured logs emitted inside `ledger` spans.

use metrics::{counter, describe_counter, describe_histogram, histogram};

// ============================================================================
// Operation Metrics
// ============================================================================

/// Ledger operations by outcome.
pub const LEDGER_OPERATIONS: &str = "causa_ledger_operations_total";

/// Ledger operation duration histogram.
pub const LEDGER_OPERATION_DURATION: &str = "causa_ledger_operation_duration_seconds";

// ============================================================================
// CAS Metrics
// ============================================================================

/// CAS retry counter.
pub const CAS_RETRY: &str = "causa_ledger_cas_retry_total";

// ============================================================================
// Bulk Scan Metrics
// ============================================================================

/// Records visited by bulk scans, by result.
pub const BULK_RECORDS: &str = "causa_ledger_bulk_records_total";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all ledger metric descriptions.
///
/// Call this once at application startup after installing the recorder.
pub fn register_metrics() {
    describe_counter!(LEDGER_OPERATIONS, "Total ledger operations by outcome");
    describe_histogram!(
        LEDGER_OPERATION_DURATION,
        "Duration of ledger operations in seconds"
    );
    describe_counter!(CAS_RETRY, "Total CAS retry attempts on case records");
    describe_counter!(BULK_RECORDS, "Total records visited by bulk scans");
}

// ============================================================================
// Recording
// ============================================================================

/// Records the outcome and duration of a ledger operation.
pub fn record_operation(operation: &str, outcome: &str, duration_secs: f64) {
    counter!(
        LEDGER_OPERATIONS,
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(LEDGER_OPERATION_DURATION, "operation" => operation.to_string())
        .record(duration_secs);
}

/// Records a CAS retry.
pub fn record_cas_retry(operation: &str) {
    counter!(CAS_RETRY, "operation" => operation.to_string()).increment(1);
}

/// Records bulk scan results for one partition.
pub fn record_bulk(operation: &str, partition: &str, updated: u64, unchanged: u64, failed: u64) {
    for (result, count) in [
        ("updated", updated),
        ("unchanged", unchanged),
        ("failed", failed),
    ] {
        if count > 0 {
            counter!(
                BULK_RECORDS,
                "operation" => operation.to_string(),
                "partition" => partition.to_string(),
                "result" => result
            )
            .increment(count);
        }
    }
}
