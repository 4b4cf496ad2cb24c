//! The subscription ledger.
//!
//! [`SubscriptionLedger`] links client folders to shared case records and
//! keeps each record's `needsSync` flag equal to the OR of its subscribers'
//! update preferences. All writes go through per-record compare-and-swap, so
//! concurrent callers on the same docket merge instead of clobbering each
//! other, and concurrent first associations create exactly one record.
//!
//! Bulk operations walk every record of every partition. Each record is
//! read, mutated and written on its own; a failure on one record is logged
//! and counted without stopping the scan.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;

use causa_core::observability::{bulk_span, ledger_span};
use causa_core::{ScopedStorage, StorageBackend};

use crate::error::{LedgerError, Result};
use crate::ids::{CaseId, DocketKey, FolderId, UserId};
use crate::metrics;
use crate::partition::Partition;
use crate::record::CaseRecord;
use crate::repair::normalize_document;
use crate::store::{CaseStore, paths};

/// Default number of CAS attempts per record write.
pub const DEFAULT_CAS_MAX_RETRIES: u32 = 8;

/// Ledger tuning.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Attempts per conditional record write before giving up.
    pub cas_max_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cas_max_retries: DEFAULT_CAS_MAX_RETRIES,
        }
    }
}

/// Input to [`SubscriptionLedger::associate_folder`].
#[derive(Debug, Clone)]
pub struct AssociateFolder {
    /// Partition holding the case.
    pub partition: Partition,
    /// Docket of the case.
    pub docket: DocketKey,
    /// Subscribing user.
    pub user_id: UserId,
    /// Folder that tracks the case.
    pub folder_id: FolderId,
    /// Whether the user currently has a paid subscription.
    pub has_paid_subscription: bool,
}

/// Display fields of a verified case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseSummary {
    /// Docket number.
    pub docket_number: String,
    /// Filing year.
    pub filing_year: String,
    /// Case caption.
    pub caption: Option<String>,
    /// Court.
    pub court: Option<String>,
    /// Subject matter.
    pub subject: Option<String>,
    /// Earliest known movement.
    pub earliest_movement: Option<DateTime<Utc>>,
}

impl CaseSummary {
    fn of(record: &CaseRecord) -> Option<Self> {
        record.is_displayable().then(|| Self {
            docket_number: record.docket_number.clone(),
            filing_year: record.filing_year.clone(),
            caption: record.caption.clone(),
            court: record.court.clone(),
            subject: record.subject.clone(),
            earliest_movement: record.earliest_movement(),
        })
    }
}

/// Result of an association.
#[derive(Debug, Clone)]
pub struct Association {
    /// Record the folder is now linked to.
    pub case_id: CaseId,
    /// True if the record was created by this call.
    pub created: bool,
    /// Sync flag after the call.
    pub needs_sync: bool,
    /// Display fields, present once the case is verified and valid.
    pub summary: Option<CaseSummary>,
}

/// Result of a dissociation.
#[derive(Debug, Clone)]
pub struct Dissociation {
    /// Record the folder was unlinked from.
    pub case_id: CaseId,
    /// False if the folder and user were already absent.
    pub changed: bool,
    /// Sync flag after the call.
    pub needs_sync: bool,
}

/// Bulk scan counts for one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionTally {
    /// Records visited.
    pub scanned: u64,
    /// Records written.
    pub updated: u64,
    /// Records that could not be read or written.
    pub failed: u64,
    /// Set when the partition could not be listed at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_error: Option<String>,
}

/// Bulk scan counts across partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    /// Per-partition counts, in [`Partition::ALL`] order.
    pub partitions: Vec<(Partition, PartitionTally)>,
}

impl BulkReport {
    /// Counts for one partition.
    #[must_use]
    pub fn partition(&self, partition: Partition) -> Option<&PartitionTally> {
        self.partitions
            .iter()
            .find(|(p, _)| *p == partition)
            .map(|(_, tally)| tally)
    }

    /// Records written across all partitions.
    #[must_use]
    pub fn total_updated(&self) -> u64 {
        self.partitions.iter().map(|(_, t)| t.updated).sum()
    }

    /// Failures across all partitions, counting unlistable partitions once.
    #[must_use]
    pub fn total_failed(&self) -> u64 {
        self.partitions
            .iter()
            .map(|(_, t)| t.failed + u64::from(t.scan_error.is_some()))
            .sum()
    }
}

/// One page of case records.
#[derive(Debug, Clone)]
pub struct CasePage {
    /// Records on this page, in docket order.
    pub records: Vec<CaseRecord>,
    /// Offset to pass for the next page, if there is one.
    pub next_offset: Option<usize>,
}

/// The four partition stores, bound at construction.
#[derive(Debug)]
struct PartitionStores {
    civil: CaseStore,
    labor: CaseStore,
    social_security: CaseStore,
    commercial: CaseStore,
}

impl PartitionStores {
    const fn get(&self, partition: Partition) -> &CaseStore {
        match partition {
            Partition::Civil => &self.civil,
            Partition::Labor => &self.labor,
            Partition::SocialSecurity => &self.social_security,
            Partition::Commercial => &self.commercial,
        }
    }
}

/// Case-folder subscription ledger over the four partitions.
#[derive(Debug, Clone)]
pub struct SubscriptionLedger {
    stores: Arc<PartitionStores>,
}

async fn observed<T, F>(operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let result = fut.await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::record_operation(operation, outcome, start.elapsed().as_secs_f64());
    match &result {
        Err(e @ LedgerError::Store { .. }) => tracing::error!(error = %e, "ledger operation failed"),
        Err(e) => tracing::debug!(error = %e, "ledger operation rejected"),
        Ok(_) => {}
    }
    result
}

impl SubscriptionLedger {
    /// Binds one store per partition on top of `backend`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Store` if a partition scope cannot be created.
    pub fn new(backend: Arc<dyn StorageBackend>, config: &LedgerConfig) -> Result<Self> {
        let bind = |partition: Partition| -> Result<CaseStore> {
            let storage = ScopedStorage::new(Arc::clone(&backend), partition.collection())
                .map_err(|e| LedgerError::store("bind_partition", e))?;
            Ok(CaseStore::new(partition, storage, config.cas_max_retries))
        };

        Ok(Self {
            stores: Arc::new(PartitionStores {
                civil: bind(Partition::Civil)?,
                labor: bind(Partition::Labor)?,
                social_security: bind(Partition::SocialSecurity)?,
                commercial: bind(Partition::Commercial)?,
            }),
        })
    }

    fn store(&self, partition: Partition) -> &CaseStore {
        self.stores.get(partition)
    }

    /// Links a folder to the case for a docket, creating the case if needed.
    ///
    /// The user's entry starts at `has_paid_subscription` and is only ever
    /// raised here. The record is tagged as app-sourced.
    ///
    /// # Errors
    ///
    /// - `DuplicateAssociation` if the folder was already linked and the
    ///   call changed nothing
    /// - `Store` on storage failure or persistent write contention
    pub async fn associate_folder(&self, request: AssociateFolder) -> Result<Association> {
        const OP: &str = "associate_folder";
        let span = ledger_span(OP, request.partition.collection());
        observed(OP, self.associate_inner(OP, &request))
            .instrument(span)
            .await
    }

    async fn associate_inner(
        &self,
        op: &'static str,
        request: &AssociateFolder,
    ) -> Result<Association> {
        let store = self.store(request.partition);
        let path = paths::case(&request.docket);
        let folder = &request.folder_id;
        let user = &request.user_id;
        let paid = request.has_paid_subscription;
        let store_err = |e| LedgerError::store(op, e);

        // A record can only disappear through out-of-band deletion; one extra
        // pass covers a delete landing between create and merge.
        for _ in 0..2 {
            if store.read_case(&path).await.map_err(store_err)?.is_none() {
                let mut record = CaseRecord::new(CaseId::generate(), &request.docket, Utc::now());
                record.link(folder, user, paid);

                if store.create_case(&path, &record).await.map_err(store_err)? {
                    store
                        .index_folder(folder, &record.id, &path)
                        .await
                        .map_err(store_err)?;
                    tracing::info!(
                        case_id = %record.id,
                        docket = %request.docket,
                        folder_id = %folder,
                        user_id = %user,
                        needs_sync = record.needs_sync(),
                        "created case record"
                    );
                    return Ok(Association {
                        case_id: record.id,
                        created: true,
                        needs_sync: record.needs_sync(),
                        summary: None,
                    });
                }
                tracing::debug!(docket = %request.docket, "lost create race; merging");
            }

            let mut duplicate = false;
            let updated = store
                .update_case(op, &path, |record| {
                    let already_linked = record.has_folder(folder);
                    let linked = record.link(folder, user, paid);
                    duplicate = already_linked && !linked;
                    record.mark_app_source() || linked
                })
                .await
                .map_err(store_err)?;

            let Some(updated) = updated else {
                continue;
            };
            let record = updated.record;
            store
                .index_folder(folder, &record.id, &path)
                .await
                .map_err(store_err)?;

            if duplicate {
                return Err(LedgerError::DuplicateAssociation {
                    folder_id: folder.to_string(),
                    case_id: record.id.to_string(),
                    needs_sync: record.needs_sync(),
                });
            }

            tracing::info!(
                case_id = %record.id,
                docket = %request.docket,
                folder_id = %folder,
                user_id = %user,
                needs_sync = record.needs_sync(),
                "associated folder with case"
            );
            return Ok(Association {
                case_id: record.id,
                created: false,
                needs_sync: record.needs_sync(),
                summary: CaseSummary::of(&record),
            });
        }

        Err(LedgerError::store(
            op,
            causa_core::Error::Internal {
                message: format!("case record {path} disappeared during association"),
            },
        ))
    }

    /// Unlinks a folder from a case and drops its user's subscription.
    ///
    /// Already-absent folders and users are a no-op. The record is kept even
    /// when nothing references it any more.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `case_id` does not resolve in the partition
    /// - `Store` on storage failure or persistent write contention
    pub async fn dissociate_folder(
        &self,
        partition: Partition,
        case_id: CaseId,
        folder: &FolderId,
        user: &UserId,
    ) -> Result<Dissociation> {
        const OP: &str = "dissociate_folder";
        let span = ledger_span(OP, partition.collection());
        observed(OP, async {
            let store = self.store(partition);
            let store_err = |e| LedgerError::store(OP, e);

            let path = store
                .resolve_id(&case_id)
                .await
                .map_err(store_err)?
                .ok_or_else(|| LedgerError::not_found("causa", case_id.to_string()))?;

            let updated = store
                .update_case(OP, &path, |record| record.unlink(folder, user))
                .await
                .map_err(store_err)?
                .ok_or_else(|| LedgerError::not_found("causa", case_id.to_string()))?;

            store
                .unindex_folder(folder, &case_id)
                .await
                .map_err(store_err)?;

            tracing::info!(
                case_id = %case_id,
                folder_id = %folder,
                user_id = %user,
                changed = updated.changed,
                needs_sync = updated.record.needs_sync(),
                "dissociated folder from case"
            );
            Ok(Dissociation {
                case_id,
                changed: updated.changed,
                needs_sync: updated.record.needs_sync(),
            })
        })
        .instrument(span)
        .await
    }

    /// Returns the case a folder is linked to, if any.
    ///
    /// # Errors
    ///
    /// Returns `Store` on storage failure.
    pub async fn find_case_by_folder(
        &self,
        partition: Partition,
        folder: &FolderId,
    ) -> Result<Option<CaseRecord>> {
        const OP: &str = "find_case_by_folder";
        let span = ledger_span(OP, partition.collection());
        observed(OP, async {
            let store = self.store(partition);
            let store_err = |e| LedgerError::store(OP, e);

            let Some(path) = store.lookup_folder(folder).await.map_err(store_err)? else {
                return Ok(None);
            };
            match store.read_case(&path).await.map_err(store_err)? {
                Some((mut record, _)) if record.has_folder(folder) => {
                    record.restore_invariants();
                    Ok(Some(record))
                }
                _ => {
                    tracing::debug!(folder_id = %folder, path = %path, "stale folder pointer");
                    Ok(None)
                }
            }
        })
        .instrument(span)
        .await
    }

    /// Sets a user's update preference on every case they subscribe to.
    ///
    /// # Errors
    ///
    /// Never fails as a whole; per-record failures are counted in the report.
    pub async fn set_user_update_preference(
        &self,
        user: &UserId,
        enabled: bool,
    ) -> Result<BulkReport> {
        const OP: &str = "set_user_update_preference";
        observed(OP, async {
            let report = self
                .scan_all(OP, |record| record.set_preference(user, enabled))
                .await;
            tracing::info!(
                user_id = %user,
                enabled,
                updated = report.total_updated(),
                failed = report.total_failed(),
                "applied user update preference"
            );
            Ok(report)
        })
        .instrument(bulk_span(OP))
        .await
    }

    /// Enables exactly the subscribers in `active` on every case.
    ///
    /// # Errors
    ///
    /// Never fails as a whole; per-record failures are counted in the report.
    pub async fn reconcile_active_subscribers(
        &self,
        active: &BTreeSet<UserId>,
    ) -> Result<BulkReport> {
        const OP: &str = "reconcile_active_subscribers";
        observed(OP, async {
            let report = self
                .scan_all(OP, |record| record.apply_roster(active))
                .await;
            tracing::info!(
                active_users = active.len(),
                updated = report.total_updated(),
                failed = report.total_failed(),
                "reconciled active subscribers"
            );
            Ok(report)
        })
        .instrument(bulk_span(OP))
        .await
    }

    /// Repairs the shape of ledger-owned array fields in one partition.
    ///
    /// Also restores missing folder pointers, so records written by other
    /// parties become reachable through [`Self::find_case_by_folder`]. Only
    /// document rewrites count as corrections.
    ///
    /// # Errors
    ///
    /// Never fails as a whole; per-record failures are counted in the tally.
    pub async fn normalize_array_shape(&self, partition: Partition) -> Result<PartitionTally> {
        const OP: &str = "normalize_array_shape";
        let span = ledger_span(OP, partition.collection());
        observed(OP, async {
            let store = self.store(partition);
            let tally = Self::scan_partition(store, OP, |store, path| async move {
                let Some(updated) = store.update_document(OP, &path, normalize_document).await?
                else {
                    return Ok(false);
                };
                let reindexed = store.reindex_document(&path, &updated.record).await?;
                if reindexed > 0 {
                    tracing::debug!(record = %path, reindexed, "restored folder pointers");
                }
                Ok(updated.changed)
            })
            .await;
            tracing::info!(
                corrected = tally.updated,
                scanned = tally.scanned,
                failed = tally.failed,
                "normalized array fields"
            );
            Ok(tally)
        })
        .instrument(span)
        .await
    }

    /// Reads a case by id.
    ///
    /// # Errors
    ///
    /// Returns `Store` on storage failure.
    pub async fn get_case(
        &self,
        partition: Partition,
        case_id: CaseId,
    ) -> Result<Option<CaseRecord>> {
        const OP: &str = "get_case";
        let span = ledger_span(OP, partition.collection());
        observed(OP, async {
            let store = self.store(partition);
            let store_err = |e| LedgerError::store(OP, e);
            let Some(path) = store.resolve_id(&case_id).await.map_err(store_err)? else {
                return Ok(None);
            };
            Ok(store
                .read_case(&path)
                .await
                .map_err(store_err)?
                .map(|(mut record, _)| {
                    record.restore_invariants();
                    record
                }))
        })
        .instrument(span)
        .await
    }

    /// Lists cases in docket order, optionally only those `subscriber`
    /// subscribes to.
    ///
    /// `offset` counts stored records, not matches; pass back `next_offset`
    /// to continue.
    ///
    /// # Errors
    ///
    /// Returns `Store` on storage failure.
    pub async fn list_cases(
        &self,
        partition: Partition,
        offset: usize,
        limit: usize,
        subscriber: Option<&UserId>,
    ) -> Result<CasePage> {
        const OP: &str = "list_cases";
        let span = ledger_span(OP, partition.collection());
        observed(OP, async {
            let store = self.store(partition);
            let store_err = |e| LedgerError::store(OP, e);
            let paths = store.list_case_paths().await.map_err(store_err)?;

            let mut records = Vec::new();
            let mut cursor = offset;
            while cursor < paths.len() && records.len() < limit {
                let path = &paths[cursor];
                cursor += 1;
                let Some((mut record, _)) = store.read_case(path).await.map_err(store_err)? else {
                    continue;
                };
                record.restore_invariants();
                if subscriber.is_none_or(|user| record.is_subscribed(user)) {
                    records.push(record);
                }
            }

            Ok(CasePage {
                records,
                next_offset: (cursor < paths.len()).then_some(cursor),
            })
        })
        .instrument(span)
        .await
    }

    async fn scan_all<F>(&self, op: &'static str, mutate: F) -> BulkReport
    where
        F: Fn(&mut CaseRecord) -> bool + Sync,
    {
        let mut report = BulkReport::default();
        for partition in Partition::ALL {
            let mutate = &mutate;
            let tally = Self::scan_partition(self.store(partition), op, |store, path| async move {
                // Repair-only writes are persisted but not counted.
                let mut applied = false;
                let updated = store
                    .update_case(op, &path, |record| {
                        applied = mutate(record);
                        applied
                    })
                    .await;
                updated.map(|updated| applied && updated.is_some_and(|u| u.changed))
            })
            .await;
            report.partitions.push((partition, tally));
        }
        report
    }

    /// Visits every record of a partition with `visit`, which reports
    /// whether it wrote the record.
    async fn scan_partition<'a, V, Fut>(
        store: &'a CaseStore,
        op: &'static str,
        visit: V,
    ) -> PartitionTally
    where
        V: Fn(&'a CaseStore, String) -> Fut,
        Fut: Future<Output = causa_core::Result<bool>> + 'a,
    {
        let partition = store.partition();
        let mut tally = PartitionTally::default();

        let paths = match store.list_case_paths().await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::error!(partition = %partition, error = %e, "failed to list partition");
                tally.scan_error = Some(e.to_string());
                return tally;
            }
        };

        for path in paths {
            tally.scanned += 1;
            match visit(store, path.clone()).await {
                Ok(true) => tally.updated += 1,
                Ok(false) => {}
                Err(e) => {
                    tally.failed += 1;
                    let (docket_number, filing_year) = paths::docket_of(&path).unwrap_or_default();
                    tracing::warn!(
                        partition = %partition,
                        record = %path,
                        docket_number,
                        filing_year,
                        error = %e,
                        "bulk update failed for record; continuing"
                    );
                }
            }
        }

        metrics::record_bulk(
            op,
            partition.collection(),
            tally.updated,
            tally.scanned - tally.updated - tally.failed,
            tally.failed,
        );
        tally
    }
}
