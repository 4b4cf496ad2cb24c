//! # causa-api
//!
//! HTTP surface for the case-folder subscription ledger.
//!
//! This crate is a thin composition layer: it authenticates callers, maps
//! JSON requests onto [`causa_ledger::SubscriptionLedger`] operations, and
//! maps ledger errors onto stable HTTP error codes. Ledger semantics live in
//! `causa-ledger`.
//!
//! ## Endpoints
//!
//! ```text
//! GET    /health                                   - Liveness
//! GET    /ready                                    - Storage readiness probe
//! GET    /metrics                                  - Prometheus metrics
//! GET    /openapi.json                             - OpenAPI document
//! POST   /api/v1/associate-folder                  - Link a folder to a case
//! DELETE /api/v1/dissociate-folder                 - Unlink a folder from a case
//! GET    /api/v1/find-by-folder/{causaType}/{id}   - Case tracked by a folder
//! PATCH  /api/v1/update-status                     - Set a user's preference everywhere
//! PATCH  /api/v1/update-by-subscriptions           - Reconcile with the paid roster
//! POST   /api/v1/migrate-array-fields/{causaType}  - Repair legacy shapes (admin)
//! GET    /api/v1/causas/{causaType}                - List cases
//! GET    /api/v1/causas/{causaType}/{causaId}      - Get a case
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use causa_api::server::Server;
//!
//! let server = Server::builder().http_port(8080).debug(true).build()?;
//! server.serve().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod openapi;
pub mod routes;
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::RequestContext;
    pub use crate::error::{ApiError, ApiResult};
    pub use crate::server::{Server, ServerBuilder};
}
