//! Document storage abstraction.
//!
//! Every ledger document is a JSON object stored under a string key. The
//! contract is deliberately small:
//! - Conditional writes with preconditions (create-only, compare-and-swap)
//! - Object metadata including an opaque version token
//! - Prefix listing for full-collection scans
//!
//! The version token is an opaque `String` so that backends can encode their
//! own notion of a generation (numeric counter, `ETag`, object version id).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use crate::error::{Error, Result};

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// Write only if the object does not exist.
    DoesNotExist,
    /// Write only if the object's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
#[derive(Debug, Clone)]
pub enum WriteResult {
    /// Write succeeded, returns the new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns the current version token.
    PreconditionFailed {
        /// The current version that caused the precondition to fail.
        current_version: String,
    },
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object path (key).
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Opaque version token for CAS operations.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend for ledger documents.
///
/// Implementations must make `put` with `DoesNotExist` and `MatchesVersion`
/// atomic with respect to concurrent writers of the same key.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads an entire object.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes with an optional precondition.
    ///
    /// Never returns an error for a failed precondition; that is reported as
    /// `WriteResult::PreconditionFailed`.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes an object. Succeeds even if the object doesn't exist.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix, in arbitrary order.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if the object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;

    /// Reads an object together with the version token that was read.
    ///
    /// Returns `None` if the object doesn't exist.
    async fn get_versioned(&self, path: &str) -> Result<Option<(Bytes, String)>>;
}

/// In-memory storage backend for tests and debug deployments.
///
/// Versions come from one counter shared by every key, so a token is never
/// reused, not even after a delete and re-create of the same key.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, StoredObject>,
    generation: u64,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    generation: u64,
    written_at: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, path: &str) -> ObjectMeta {
        ObjectMeta {
            path: path.to_string(),
            size: self.data.len() as u64,
            version: self.generation.to_string(),
            last_modified: Some(self.written_at),
        }
    }

    fn matches(&self, token: &str) -> bool {
        token.parse::<u64>().is_ok_and(|g| g == self.generation)
    }
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> Error {
    Error::Internal {
        message: "memory backend lock poisoned".into(),
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.read()?
            .objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::not_found(path))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut state = self.write()?;
        let current = state.objects.get(path);

        let allowed = match (&precondition, current) {
            (WritePrecondition::None, _) | (WritePrecondition::DoesNotExist, None) => true,
            (WritePrecondition::DoesNotExist, Some(_)) | (WritePrecondition::MatchesVersion(_), None) => false,
            (WritePrecondition::MatchesVersion(token), Some(obj)) => obj.matches(token),
        };
        if !allowed {
            let current_version = current.map_or_else(String::new, |o| o.generation.to_string());
            return Ok(WriteResult::PreconditionFailed { current_version });
        }

        state.generation += 1;
        let generation = state.generation;
        state.objects.insert(
            path.to_string(),
            StoredObject {
                data,
                generation,
                written_at: Utc::now(),
            },
        );
        Ok(WriteResult::Success {
            version: generation.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.write()?.objects.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let state = self.read()?;
        Ok(state
            .objects
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, obj)| obj.meta(path))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        Ok(self.read()?.objects.get(path).map(|obj| obj.meta(path)))
    }

    async fn get_versioned(&self, path: &str) -> Result<Option<(Bytes, String)>> {
        Ok(self
            .read()?
            .objects
            .get(path)
            .map(|obj| (obj.data.clone(), obj.generation.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn put(backend: &MemoryBackend, path: &str, body: &'static str, pre: WritePrecondition) -> WriteResult {
        backend.put(path, Bytes::from(body), pre).await.unwrap()
    }

    fn version_of(result: WriteResult) -> String {
        match result {
            WriteResult::Success { version } => version,
            WriteResult::PreconditionFailed { current_version } => {
                panic!("write rejected, current version {current_version:?}")
            }
        }
    }

    #[tokio::test]
    async fn test_create_only_admits_one_writer() {
        let backend = MemoryBackend::new();
        let first = put(&backend, "cases/1-2024.json", "{\"a\":1}", WritePrecondition::DoesNotExist).await;
        let second = put(&backend, "cases/1-2024.json", "{\"a\":2}", WritePrecondition::DoesNotExist).await;

        let winner = version_of(first);
        assert!(matches!(
            second,
            WriteResult::PreconditionFailed { ref current_version } if *current_version == winner
        ));
        assert_eq!(backend.get("cases/1-2024.json").await.unwrap(), Bytes::from("{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_token() {
        let backend = MemoryBackend::new();
        let v1 = version_of(put(&backend, "doc.json", "v1", WritePrecondition::None).await);
        let v2 = version_of(put(&backend, "doc.json", "v2", WritePrecondition::MatchesVersion(v1.clone())).await);
        assert_ne!(v1, v2);

        let stale = put(&backend, "doc.json", "v3", WritePrecondition::MatchesVersion(v1)).await;
        assert!(matches!(stale, WriteResult::PreconditionFailed { .. }));

        let missing = put(&backend, "ghost.json", "x", WritePrecondition::MatchesVersion(v2)).await;
        assert!(matches!(missing, WriteResult::PreconditionFailed { .. }));
        assert_eq!(backend.get("doc.json").await.unwrap(), Bytes::from("v2"));
    }

    #[tokio::test]
    async fn test_version_tokens_survive_recreate() {
        let backend = MemoryBackend::new();
        let before = version_of(put(&backend, "idx.json", "a", WritePrecondition::None).await);
        backend.delete("idx.json").await.unwrap();
        backend.delete("idx.json").await.unwrap();
        put(&backend, "idx.json", "b", WritePrecondition::None).await;

        let stale = put(&backend, "idx.json", "c", WritePrecondition::MatchesVersion(before)).await;
        assert!(matches!(stale, WriteResult::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn test_reads_agree_on_version() {
        let backend = MemoryBackend::new();
        let version = version_of(put(&backend, "v.json", "b", WritePrecondition::None).await);

        let (data, read_version) = backend.get_versioned("v.json").await.unwrap().unwrap();
        let meta = backend.head("v.json").await.unwrap().unwrap();
        assert_eq!(data, Bytes::from("b"));
        assert_eq!(read_version, version);
        assert_eq!(meta.version, version);
        assert_eq!(meta.size, 1);

        assert!(backend.get_versioned("none.json").await.unwrap().is_none());
        assert!(backend.get("none.json").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_is_prefix_bounded_and_sorted() {
        let backend = MemoryBackend::new();
        for path in ["b/1.json", "a/2.json", "a/1.json", "ab.json"] {
            put(&backend, path, "{}", WritePrecondition::None).await;
        }

        let listed: Vec<String> = backend
            .list("a/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.path)
            .collect();
        assert_eq!(listed, vec!["a/1.json", "a/2.json"]);
        assert_eq!(backend.list("").await.unwrap().len(), 4);
    }
}
