//! HTTP route handlers.

pub mod cases;
pub mod subscriptions;

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

/// `/api/v1` routes (authenticated).
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(subscriptions::routes())
        .merge(cases::routes())
}
