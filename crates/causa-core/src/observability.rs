//! Observability infrastructure.
//!
//! Structured logging with consistent spans. Every ledger operation runs
//! inside a `ledger` span carrying the operation name and partition.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Subsequent calls are no-ops.
///
/// `RUST_LOG` controls levels (e.g. `info`, `causa_ledger=debug`).
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for a ledger operation scoped to one partition.
///
/// # Example
///
/// ```rust
/// use causa_core::observability::ledger_span;
///
/// let span = ledger_span("associate_folder", "causas-civil");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn ledger_span(operation: &str, partition: &str) -> Span {
    tracing::info_span!("ledger", op = operation, partition = partition)
}

/// Creates a span for a ledger operation that fans out across all partitions.
#[must_use]
pub fn bulk_span(operation: &str) -> Span {
    tracing::info_span!("ledger_bulk", op = operation)
}
