//! Collection-scoped storage.
//!
//! A `ScopedStorage` pins every path under a fixed collection prefix such as
//! `ledger/collection=causas-civil/`. The ledger binds one scope per partition
//! at startup, so a handler can never read or write across partitions by
//! accident.
//!
//! # Security
//!
//! - The collection name is validated at construction
//! - Relative paths with traversal (`..`), absolute paths, backslashes, and
//!   percent-encoding are rejected

use bytes::Bytes;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Root prefix for all ledger collections.
pub const LEDGER_ROOT: &str = "ledger";

/// Storage wrapper scoped to one collection.
#[derive(Clone)]
pub struct ScopedStorage {
    backend: Arc<dyn StorageBackend>,
    collection: String,
    /// `ledger/collection={collection}/`, with the trailing slash.
    root: String,
}

impl std::fmt::Debug for ScopedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStorage")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

fn is_collection_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '-' | '_')
}

/// Returns why `path` may not be used inside a scope, if it may not.
fn path_violation(path: &str) -> Option<&'static str> {
    if path.starts_with(['/', '\\']) {
        Some("absolute paths not allowed")
    } else if path.contains('\\') {
        Some("backslashes not allowed")
    } else if path.contains('%') {
        Some("percent-encoding not allowed")
    } else if path.contains(['\n', '\r', '\0']) {
        Some("control characters not allowed")
    } else if path.split('/').any(|seg| seg == "." || seg == "..") {
        Some("path traversal not allowed")
    } else {
        None
    }
}

impl ScopedStorage {
    /// Binds `backend` to one collection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidId` if `collection` is empty or contains characters
    /// other than ASCII lowercase letters, digits, `-` and `_`.
    pub fn new(backend: Arc<dyn StorageBackend>, collection: impl Into<String>) -> Result<Self> {
        let collection = collection.into();
        if collection.is_empty() || !collection.chars().all(is_collection_char) {
            return Err(Error::InvalidId {
                message: format!(
                    "collection '{collection}' must be non-empty and use only a-z, 0-9, '-', '_'"
                ),
            });
        }
        let root = format!("{LEDGER_ROOT}/collection={collection}/");
        Ok(Self {
            backend,
            collection,
            root,
        })
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the unscoped backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn resolve(&self, path: &str) -> Result<String> {
        match path_violation(path) {
            Some(reason) => Err(Error::InvalidInput(format!("{reason}: {path}"))),
            None => Ok(format!("{}{path}", self.root)),
        }
    }

    /// Reads data and its version token at a scope-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the backend fails.
    pub async fn get_versioned(&self, path: &str) -> Result<Option<(Bytes, String)>> {
        self.backend.get_versioned(&self.resolve(path)?).await
    }

    /// Writes data at a scope-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the backend fails.
    pub async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.backend.put(&self.resolve(path)?, data, precondition).await
    }

    /// Deletes data at a scope-relative path. Missing objects are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the backend fails.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.backend.delete(&self.resolve(path)?).await
    }

    /// Lists objects under a scope-relative prefix.
    ///
    /// Returns relative paths (without the scope prefix), sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is invalid or the backend fails.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ScopedPath>> {
        let metas = self.backend.list(&self.resolve(prefix)?).await?;
        let mut paths: Vec<ScopedPath> = metas
            .into_iter()
            .filter_map(|m| m.path.strip_prefix(&self.root).map(|p| ScopedPath(p.to_string())))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Gets metadata at a scope-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the backend fails.
    pub async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.backend.head(&self.resolve(path)?).await
    }
}

/// A path relative to a scope, as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScopedPath(String);

impl ScopedPath {
    /// The relative path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScopedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn scoped(collection: &str) -> ScopedStorage {
        ScopedStorage::new(Arc::new(MemoryBackend::new()), collection).unwrap()
    }

    #[test]
    fn rejects_invalid_collection_names() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        assert!(ScopedStorage::new(Arc::clone(&backend), "").is_err());
        assert!(ScopedStorage::new(Arc::clone(&backend), "Causas").is_err());
        assert!(ScopedStorage::new(Arc::clone(&backend), "a/b").is_err());
        assert!(ScopedStorage::new(backend, "causas-civil").is_ok());
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let storage = scoped("causas-civil");
        for bad in ["../other/x.json", "/abs.json", "a\\b.json", "a%2e.json", "cases/./x"] {
            let err = storage
                .put(bad, Bytes::from("{}"), WritePrecondition::None)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn scopes_do_not_see_each_other() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let civil = ScopedStorage::new(Arc::clone(&backend), "causas-civil").unwrap();
        let labor = ScopedStorage::new(Arc::clone(&backend), "causas-trabajo").unwrap();

        civil
            .put("cases/1.json", Bytes::from("{}"), WritePrecondition::None)
            .await
            .unwrap();

        assert_eq!(civil.list("cases/").await.unwrap().len(), 1);
        assert!(labor.list("cases/").await.unwrap().is_empty());
        assert!(labor.head("cases/1.json").await.unwrap().is_none());

        let raw = backend
            .head("ledger/collection=causas-civil/cases/1.json")
            .await
            .unwrap();
        assert!(raw.is_some());
    }

    #[tokio::test]
    async fn list_returns_sorted_relative_paths() {
        let storage = scoped("causas-comercial");
        for path in ["cases/b.json", "cases/a.json", "folders/x.json"] {
            storage
                .put(path, Bytes::from("{}"), WritePrecondition::None)
                .await
                .unwrap();
        }
        let listed = storage.list("cases/").await.unwrap();
        let names: Vec<&str> = listed.iter().map(ScopedPath::as_str).collect();
        assert_eq!(names, vec!["cases/a.json", "cases/b.json"]);
    }
}
