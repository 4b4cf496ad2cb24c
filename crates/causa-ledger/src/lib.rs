//! # causa-ledger
//!
//! Case-folder subscription ledger.
//!
//! Users bookmark legal cases in personal folders. Each bookmark links a
//! folder to a case record shared by everyone tracking the same docket, and
//! each record carries a `needsSync` flag that tells the sync worker whether
//! any subscriber still wants updates.
//!
//! ## Guarantees
//!
//! - **One record per docket**: records are keyed by `(docketNumber,
//!   filingYear)` and created with a create-only write
//! - **Derived flag**: `needsSync` is recomputed on every write from the
//!   subscription entries
//! - **Monotonic enable**: associating never lowers a user's `enabled` flag
//! - **Records persist**: removing the last subscriber keeps the record
//!
//! ## Example
//!
//! ```rust
//! # tokio_test::block_on(async {
//! use std::sync::Arc;
//! use causa_core::MemoryBackend;
//! use causa_ledger::prelude::*;
//!
//! let ledger = SubscriptionLedger::new(Arc::new(MemoryBackend::new()), &LedgerConfig::default())?;
//! let association = ledger
//!     .associate_folder(AssociateFolder {
//!         partition: Partition::resolve("CIV")?,
//!         docket: DocketKey::new("12345", "2024")?,
//!         user_id: UserId::parse("user-a")?,
//!         folder_id: FolderId::parse("folder-a")?,
//!         has_paid_subscription: true,
//!     })
//!     .await?;
//! assert!(association.created);
//! assert!(association.needs_sync);
//! # Ok::<(), LedgerError>(())
//! # }).unwrap();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod error;
pub mod ids;
pub mod ledger;
pub mod metrics;
pub mod partition;
pub mod record;
pub mod repair;
mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{LedgerError, Result};
    pub use crate::ids::{CaseId, DocketKey, FolderId, UserId};
    pub use crate::ledger::{
        AssociateFolder, Association, BulkReport, CasePage, CaseSummary, Dissociation,
        LedgerConfig, PartitionTally, SubscriptionLedger,
    };
    pub use crate::partition::Partition;
    pub use crate::record::{CaseRecord, SubscriptionEntries, recompute_needs_sync};
}

pub use error::{LedgerError, Result};
pub use ledger::{LedgerConfig, SubscriptionLedger};
pub use partition::Partition;
