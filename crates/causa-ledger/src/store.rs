//! Per-partition case storage.
//!
//! Layout inside a partition's scope:
//!
//! ```text
//! cases/{number}-{year}.json     case record, keyed by docket
//! ids/{caseId}.json              pointer from record id to docket path
//! folders/{folderId}.json        pointer from folder to docket path
//! ```
//!
//! The docket-derived record path is the uniqueness constraint: records are
//! created with `DoesNotExist`, so concurrent creators of the same docket
//! resolve to one winner and the rest merge into it. The id pointer is
//! written before the record so every stored record is resolvable by id.
//! Pointers are hints; every read through a pointer is validated against the
//! record it lands on.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use causa_core::{Error, Result, ScopedStorage, WritePrecondition, WriteResult};

use crate::ids::{CaseId, DocketKey, FolderId};
use crate::metrics;
use crate::partition::Partition;
use crate::record::CaseRecord;

/// Storage paths within a partition.
pub mod paths {
    use super::{CaseId, DocketKey, FolderId};

    /// Prefix of all case records.
    pub const CASES_PREFIX: &str = "cases/";

    /// Record path for a docket.
    #[must_use]
    pub fn case(docket: &DocketKey) -> String {
        format!("{CASES_PREFIX}{}.json", docket.slug())
    }

    /// Splits a record path back into docket number and filing year.
    #[must_use]
    pub fn docket_of(path: &str) -> Option<(&str, &str)> {
        path.strip_prefix(CASES_PREFIX)?
            .strip_suffix(".json")?
            .rsplit_once('-')
    }

    /// Id pointer path.
    #[must_use]
    pub fn id_index(id: &CaseId) -> String {
        format!("ids/{id}.json")
    }

    /// Folder pointer path.
    #[must_use]
    pub fn folder_index(folder: &FolderId) -> String {
        format!("folders/{folder}.json")
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    case_id: CaseId,
    case_path: String,
}

/// Outcome of a conditional update.
#[derive(Debug)]
pub(crate) struct Updated<T> {
    pub record: T,
    pub changed: bool,
}

/// Case records of one partition.
#[derive(Debug, Clone)]
pub(crate) struct CaseStore {
    partition: Partition,
    storage: ScopedStorage,
    cas_max_retries: u32,
}

fn json_bytes<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| Error::Serialization {
            message: format!("serialize JSON: {e}"),
        })
}

fn parse_json<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Serialization {
        message: format!("parse JSON at {path}: {e}"),
    })
}

impl CaseStore {
    pub fn new(partition: Partition, storage: ScopedStorage, cas_max_retries: u32) -> Self {
        Self {
            partition,
            storage,
            cas_max_retries: cas_max_retries.max(1),
        }
    }

    pub const fn partition(&self) -> Partition {
        self.partition
    }

    #[cfg(test)]
    pub fn storage(&self) -> &ScopedStorage {
        &self.storage
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<(T, String)>> {
        match self.storage.get_versioned(path).await? {
            Some((bytes, version)) => Ok(Some((parse_json(path, &bytes)?, version))),
            None => Ok(None),
        }
    }

    /// Reads a record and the version it was read at.
    pub async fn read_case(&self, path: &str) -> Result<Option<(CaseRecord, String)>> {
        self.read_json(path).await
    }

    /// Creates a record at its docket path.
    ///
    /// Returns false without writing anything if a record already exists
    /// there.
    pub async fn create_case(&self, path: &str, record: &CaseRecord) -> Result<bool> {
        let index_path = paths::id_index(&record.id);
        let pointer = IndexEntry {
            case_id: record.id,
            case_path: path.to_string(),
        };
        self.storage
            .put(&index_path, json_bytes(&pointer)?, WritePrecondition::None)
            .await?;

        match self
            .storage
            .put(path, json_bytes(record)?, WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => Ok(true),
            WriteResult::PreconditionFailed { .. } => {
                if let Err(e) = self.storage.delete(&index_path).await {
                    tracing::warn!(
                        partition = %self.partition,
                        path = %index_path,
                        error = %e,
                        "failed to remove id pointer of lost create"
                    );
                }
                Ok(false)
            }
        }
    }

    /// Applies `mutate` to the record at `path` under compare-and-swap.
    ///
    /// The closure runs against a fresh read on every attempt and returns
    /// whether it changed anything; unchanged records are not written.
    /// Returns `None` if no record exists at `path`.
    pub async fn update_case<F>(
        &self,
        operation: &'static str,
        path: &str,
        mut mutate: F,
    ) -> Result<Option<Updated<CaseRecord>>>
    where
        F: FnMut(&mut CaseRecord) -> bool + Send,
    {
        self.update_json(operation, path, |record: &mut CaseRecord| {
            // Also repairs records written by other parties.
            let mut changed = record.restore_invariants();
            changed |= mutate(record);
            if changed {
                record.updated_at = Some(chrono::Utc::now());
            }
            changed
        })
        .await
    }

    /// Applies `mutate` to the raw JSON document at `path` under
    /// compare-and-swap.
    pub async fn update_document<F>(
        &self,
        operation: &'static str,
        path: &str,
        mutate: F,
    ) -> Result<Option<Updated<serde_json::Value>>>
    where
        F: FnMut(&mut serde_json::Value) -> Result<bool> + Send,
    {
        self.update_json_fallible(operation, path, mutate).await
    }

    async fn update_json<T, F>(
        &self,
        operation: &'static str,
        path: &str,
        mut mutate: F,
    ) -> Result<Option<Updated<T>>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut(&mut T) -> bool + Send,
    {
        self.update_json_fallible(operation, path, |doc: &mut T| Ok(mutate(doc)))
            .await
    }

    async fn update_json_fallible<T, F>(
        &self,
        operation: &'static str,
        path: &str,
        mut mutate: F,
    ) -> Result<Option<Updated<T>>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut(&mut T) -> Result<bool> + Send,
    {
        for attempt in 1..=self.cas_max_retries {
            let Some((mut record, version)) = self.read_json::<T>(path).await? else {
                return Ok(None);
            };

            if !mutate(&mut record)? {
                return Ok(Some(Updated {
                    record,
                    changed: false,
                }));
            }

            match self
                .storage
                .put(
                    path,
                    json_bytes(&record)?,
                    WritePrecondition::MatchesVersion(version),
                )
                .await?
            {
                WriteResult::Success { .. } => {
                    return Ok(Some(Updated {
                        record,
                        changed: true,
                    }));
                }
                WriteResult::PreconditionFailed { .. } => {
                    metrics::record_cas_retry(operation);
                    tracing::debug!(
                        partition = %self.partition,
                        path,
                        attempt,
                        "case record changed underneath update; retrying"
                    );
                }
            }
        }

        Err(Error::PreconditionFailed {
            message: format!(
                "{path} lost CAS race after {} attempts",
                self.cas_max_retries
            ),
        })
    }

    /// Resolves a record id to its docket path.
    ///
    /// Returns `None` for unknown ids and for pointers whose record carries a
    /// different id.
    pub async fn resolve_id(&self, id: &CaseId) -> Result<Option<String>> {
        let index_path = paths::id_index(id);
        let Some((bytes, _)) = self.storage.get_versioned(&index_path).await? else {
            return Ok(None);
        };
        let entry: IndexEntry = parse_json(&index_path, &bytes)?;
        if entry.case_id != *id {
            return Ok(None);
        }
        match self.read_case(&entry.case_path).await? {
            Some((record, _)) if record.id == *id => Ok(Some(entry.case_path)),
            _ => Ok(None),
        }
    }

    /// Points a folder at a record.
    pub async fn index_folder(&self, folder: &FolderId, id: &CaseId, path: &str) -> Result<()> {
        let entry = IndexEntry {
            case_id: *id,
            case_path: path.to_string(),
        };
        self.storage
            .put(
                &paths::folder_index(folder),
                json_bytes(&entry)?,
                WritePrecondition::None,
            )
            .await?;
        Ok(())
    }

    /// Returns the record path a folder points at, if any.
    pub async fn lookup_folder(&self, folder: &FolderId) -> Result<Option<String>> {
        let index_path = paths::folder_index(folder);
        match self.storage.get_versioned(&index_path).await? {
            Some((bytes, _)) => {
                let entry: IndexEntry = parse_json(&index_path, &bytes)?;
                Ok(Some(entry.case_path))
            }
            None => Ok(None),
        }
    }

    /// Points every folder listed in a raw record document at `path`.
    ///
    /// Documents without a readable `id` are skipped. Returns how many
    /// pointers were written.
    pub async fn reindex_document(&self, path: &str, doc: &serde_json::Value) -> Result<usize> {
        let Some(id) = doc
            .get("id")
            .and_then(|v| serde_json::from_value::<CaseId>(v.clone()).ok())
        else {
            return Ok(0);
        };
        let folders = doc
            .get("folderRefs")
            .and_then(serde_json::Value::as_array)
            .map(|refs| {
                refs.iter()
                    .filter_map(serde_json::Value::as_str)
                    .filter_map(|raw| FolderId::parse(raw).ok())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let mut written = 0;
        for folder in folders {
            if self.lookup_folder(&folder).await?.as_deref() != Some(path) {
                self.index_folder(&folder, &id, path).await?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Removes a folder pointer if it still points at `id`.
    ///
    /// An associate of the same folder may link it again between the
    /// caller's record write and the delete. Associates write the record
    /// before the pointer, so re-reading the record after the delete catches
    /// every such link; the pointer is then restored. Returns whether the
    /// pointer was restored.
    pub async fn unindex_folder(&self, folder: &FolderId, id: &CaseId) -> Result<bool> {
        let index_path = paths::folder_index(folder);
        let Some((bytes, _)) = self.storage.get_versioned(&index_path).await? else {
            return Ok(false);
        };
        let entry: IndexEntry = parse_json(&index_path, &bytes)?;
        if entry.case_id != *id {
            return Ok(false);
        }
        self.storage.delete(&index_path).await?;

        match self.read_case(&entry.case_path).await? {
            Some((record, _)) if record.id == *id && record.has_folder(folder) => {
                self.index_folder(folder, id, &entry.case_path).await?;
                tracing::debug!(
                    partition = %self.partition,
                    folder_id = %folder,
                    case_id = %id,
                    "folder relinked during unindex; pointer restored"
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Lists all record paths, sorted.
    pub async fn list_case_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .storage
            .list(paths::CASES_PREFIX)
            .await?
            .into_iter()
            .map(|p| p.as_str().to_string())
            .filter(|p| p.ends_with(".json"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causa_core::{MemoryBackend, StorageBackend};
    use chrono::Utc;
    use std::sync::Arc;

    use crate::ids::UserId;

    fn store() -> CaseStore {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let storage = ScopedStorage::new(backend, Partition::Civil.collection()).unwrap();
        CaseStore::new(Partition::Civil, storage, 3)
    }

    fn docket() -> DocketKey {
        DocketKey::new("12345", "2024").unwrap()
    }

    #[test]
    fn record_paths_roundtrip_docket() {
        let path = paths::case(&docket());
        assert_eq!(path, "cases/12345-2024.json");
        assert_eq!(paths::docket_of(&path), Some(("12345", "2024")));
        assert_eq!(paths::docket_of("ids/x.json"), None);
    }

    #[tokio::test]
    async fn second_create_for_same_docket_loses() {
        let store = store();
        let path = paths::case(&docket());
        let first = CaseRecord::new(CaseId::generate(), &docket(), Utc::now());
        let second = CaseRecord::new(CaseId::generate(), &docket(), Utc::now());

        assert!(store.create_case(&path, &first).await.unwrap());
        assert!(!store.create_case(&path, &second).await.unwrap());

        assert_eq!(store.resolve_id(&first.id).await.unwrap(), Some(path));
        assert_eq!(store.resolve_id(&second.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_skips_write_when_nothing_changes() {
        let store = store();
        let path = paths::case(&docket());
        let record = CaseRecord::new(CaseId::generate(), &docket(), Utc::now());
        store.create_case(&path, &record).await.unwrap();

        let (_, before) = store.read_case(&path).await.unwrap().unwrap();
        let updated = store
            .update_case("test", &path, |_| false)
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.changed);
        let (_, after) = store.read_case(&path).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn update_of_missing_record_is_none() {
        let store = store();
        let result = store
            .update_case("test", "cases/nope-2024.json", |_| true)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn update_gives_up_after_max_retries() {
        let store = store();
        let path = paths::case(&docket());
        let record = CaseRecord::new(CaseId::generate(), &docket(), Utc::now());
        store.create_case(&path, &record).await.unwrap();

        // The closure bumps the stored version on every attempt, so every
        // CAS write sees a stale version.
        let backend = Arc::clone(store.storage().backend());
        let full_path = format!("ledger/collection=causas-civil/{path}");
        let err = store
            .update_case("test", &path, |rec| {
                let bytes = serde_json::to_vec(&*rec).unwrap();
                let backend = Arc::clone(&backend);
                let full_path = full_path.clone();
                std::thread::spawn(move || {
                    tokio_test::block_on(backend.put(
                        &full_path,
                        Bytes::from(bytes),
                        WritePrecondition::None,
                    ))
                })
                .join()
                .unwrap()
                .unwrap();
                rec.link(
                    &FolderId::parse("f1").unwrap(),
                    &UserId::parse("u1").unwrap(),
                    true,
                )
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn folder_pointer_removed_only_for_owner() {
        let store = store();
        let folder = FolderId::parse("f1").unwrap();
        let owner = CaseId::generate();
        let other = CaseId::generate();

        store
            .index_folder(&folder, &owner, "cases/1-2024.json")
            .await
            .unwrap();
        store.unindex_folder(&folder, &other).await.unwrap();
        assert!(store.lookup_folder(&folder).await.unwrap().is_some());

        store.unindex_folder(&folder, &owner).await.unwrap();
        assert!(store.lookup_folder(&folder).await.unwrap().is_none());
    }
}
