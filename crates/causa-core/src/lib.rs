//! # causa-core
//!
//! Core abstractions for the causa subscription ledger.
//!
//! - **Storage**: a conditional-write document store contract with an
//!   in-memory backend and a GCS/S3 backend
//! - **Scoped storage**: per-collection path isolation
//! - **Errors**: shared error definitions and result types
//! - **Observability**: logging initialization and span helpers
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use causa_core::prelude::*;
//!
//! let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
//! let civil = ScopedStorage::new(backend, "causas-civil").expect("valid collection");
//! assert_eq!(civil.collection(), "causas-civil");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cloud;
pub mod error;
pub mod observability;
pub mod scoped_storage;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cloud::ObjectStoreBackend;
    pub use crate::error::{Error, Result};
    pub use crate::scoped_storage::{ScopedPath, ScopedStorage};
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
}

pub use cloud::ObjectStoreBackend;
pub use error::{Error, Result};
pub use observability::{LogFormat, init_logging};
pub use scoped_storage::{ScopedPath, ScopedStorage};
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
