//! HTTP metrics middleware and the Prometheus recorder.
//!
//! Request metrics are labelled by the matched route template, never by the
//! raw path, so folder and case identifiers do not leak into label values.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Request latency histogram, in seconds.
pub const API_REQUEST_DURATION: &str = "causa_api_request_duration_seconds";

/// Request counter.
pub const API_REQUEST_TOTAL: &str = "causa_api_request_total";

const UNMATCHED_ENDPOINT: &str = "unmatched";
const SLOW_REQUEST: Duration = Duration::from_secs(1);

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the process-wide Prometheus recorder and describes every
/// metric the API and ledger emit.
///
/// Idempotent: later calls return the handle installed by the first.
///
/// # Panics
///
/// Panics if another recorder was already installed by someone else.
#[allow(clippy::panic)]
pub fn init_metrics() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| {
            let handle = match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => handle,
                Err(e) => panic!("cannot install prometheus recorder: {e}"),
            };
            describe_histogram!(API_REQUEST_DURATION, "HTTP request latency in seconds");
            describe_counter!(API_REQUEST_TOTAL, "HTTP requests served");
            causa_ledger::metrics::register_metrics();
            tracing::info!("metrics recorder installed");
            handle
        })
        .clone()
}

/// The installed recorder, if [`init_metrics`] has run.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    RECORDER.get().cloned()
}

pub(crate) fn endpoint_label<B>(request: &Request<B>) -> String {
    match request.extensions().get::<MatchedPath>() {
        Some(path) => path.as_str().to_string(),
        None => UNMATCHED_ENDPOINT.to_string(),
    }
}

/// Records `causa_api_request_duration_seconds` and `causa_api_request_total`
/// with `endpoint`, `method` and `status_class` labels.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let endpoint = endpoint_label(&request);
    let method = request.method().as_str().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    let elapsed = started.elapsed();
    let status = response.status();

    let labels = [
        ("endpoint", endpoint),
        ("method", method),
        ("status_class", status_class(status).to_string()),
    ];
    histogram!(API_REQUEST_DURATION, &labels).record(elapsed.as_secs_f64());
    counter!(API_REQUEST_TOTAL, &labels).increment(1);

    if elapsed > SLOW_REQUEST {
        let [(_, endpoint), (_, method), _] = &labels;
        tracing::warn!(
            %endpoint,
            %method,
            status = status.as_u16(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "slow request"
        );
    }

    response
}

fn status_class(status: StatusCode) -> &'static str {
    if status.is_informational() {
        "1xx"
    } else if status.is_success() {
        "2xx"
    } else if status.is_redirection() {
        "3xx"
    } else if status.is_client_error() {
        "4xx"
    } else if status.is_server_error() {
        "5xx"
    } else {
        "unknown"
    }
}

/// Renders the Prometheus text exposition, or 503 before [`init_metrics`].
pub fn serve_metrics() -> Response {
    let text_plain = [(header::CONTENT_TYPE, "text/plain; charset=utf-8")];
    match prometheus_handle() {
        Some(handle) => (StatusCode::OK, text_plain, handle.render()).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            text_plain,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}
