//! Object storage backend (GCS or S3) built on `object_store`.
//!
//! Conditional writes map onto the provider's native preconditions:
//! `DoesNotExist` becomes `PutMode::Create` and `MatchesVersion` becomes
//! `PutMode::Update`. GCS matches on the object generation and S3 matches on
//! the `ETag`, so the version token carries both as `{etag}#{generation}`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};

use crate::error::{Error, Result};
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Storage backend over a cloud object store bucket.
#[derive(Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreBackend {
    /// Builds a backend from a bucket URI.
    ///
    /// `s3://` and `s3a://` select S3; `gs://` or a bare bucket name selects GCS.
    /// Credentials come from the provider's standard environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is empty or the client cannot be built.
    pub fn from_bucket(bucket: &str) -> Result<Self> {
        let bucket = bucket.trim();
        if let Some(name) = bucket
            .strip_prefix("s3://")
            .or_else(|| bucket.strip_prefix("s3a://"))
        {
            return Self::s3(name);
        }
        Self::gcs(bucket.strip_prefix("gs://").unwrap_or(bucket))
    }

    /// Builds a GCS-backed store.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket name is empty or the client cannot be built.
    pub fn gcs(bucket: &str) -> Result<Self> {
        let name = bucket_name(bucket)?;
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(name)
            .build()
            .map_err(|e| Error::storage_with_source(format!("build GCS client for {name}"), e))?;
        Ok(Self {
            store: Arc::new(store),
            bucket: name.to_string(),
        })
    }

    /// Builds an S3-backed store with `ETag`-conditional puts enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket name is empty or the client cannot be built.
    pub fn s3(bucket: &str) -> Result<Self> {
        let name = bucket_name(bucket)?;
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(name)
            .with_conditional_put(S3ConditionalPut::ETagMatch)
            .build()
            .map_err(|e| Error::storage_with_source(format!("build S3 client for {name}"), e))?;
        Ok(Self {
            store: Arc::new(store),
            bucket: name.to_string(),
        })
    }
}

fn bucket_name(raw: &str) -> Result<&str> {
    let name = raw.trim().trim_end_matches('/');
    if name.is_empty() {
        return Err(Error::InvalidInput("storage bucket cannot be empty".into()));
    }
    Ok(name)
}

fn encode_version(e_tag: Option<&str>, version: Option<&str>) -> String {
    format!("{}#{}", e_tag.unwrap_or_default(), version.unwrap_or_default())
}

fn decode_version(token: &str) -> UpdateVersion {
    let (e_tag, version) = token.rsplit_once('#').unwrap_or((token, ""));
    UpdateVersion {
        e_tag: (!e_tag.is_empty()).then(|| e_tag.to_string()),
        version: (!version.is_empty()).then(|| version.to_string()),
    }
}

fn convert_meta(meta: &object_store::ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        path: meta.location.to_string(),
        size: u64::try_from(meta.size).unwrap_or(u64::MAX),
        version: encode_version(meta.e_tag.as_deref(), meta.version.as_deref()),
        last_modified: Some(meta.last_modified),
    }
}

fn map_error(operation: &str, path: &str, err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { .. } => Error::not_found(path),
        other => Error::storage_with_source(format!("{operation} {path}"), other),
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let location = ObjectPath::from(path);
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_error("get", path, e))?;
        result.bytes().await.map_err(|e| map_error("read", path, e))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let location = ObjectPath::from(path);
        let mode = match precondition {
            WritePrecondition::DoesNotExist => PutMode::Create,
            WritePrecondition::MatchesVersion(token) => PutMode::Update(decode_version(&token)),
            WritePrecondition::None => PutMode::Overwrite,
        };

        match self
            .store
            .put_opts(&location, PutPayload::from(data), PutOptions::from(mode))
            .await
        {
            Ok(result) => Ok(WriteResult::Success {
                version: encode_version(result.e_tag.as_deref(), result.version.as_deref()),
            }),
            Err(object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. }) => {
                let current_version = self
                    .head(path)
                    .await?
                    .map_or_else(|| "0".to_string(), |meta| meta.version);
                Ok(WriteResult::PreconditionFailed { current_version })
            }
            Err(e) => Err(map_error("put", path, e)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let location = ObjectPath::from(path);
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_error("delete", path, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let location = ObjectPath::from(prefix.trim_end_matches('/'));
        let metas: Vec<object_store::ObjectMeta> = self
            .store
            .list(Some(&location))
            .try_collect()
            .await
            .map_err(|e| map_error("list", prefix, e))?;
        Ok(metas
            .iter()
            .map(convert_meta)
            .filter(|meta| meta.path.starts_with(prefix))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let location = ObjectPath::from(path);
        match self.store.head(&location).await {
            Ok(meta) => Ok(Some(convert_meta(&meta))),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(map_error("head", path, e)),
        }
    }

    async fn get_versioned(&self, path: &str) -> Result<Option<(Bytes, String)>> {
        let location = ObjectPath::from(path);
        let result = match self.store.get(&location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(map_error("get", path, e)),
        };
        let version = encode_version(result.meta.e_tag.as_deref(), result.meta.version.as_deref());
        let data = result.bytes().await.map_err(|e| map_error("read", path, e))?;
        Ok(Some((data, version)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_token_roundtrips_both_parts() {
        let token = encode_version(Some("\"abc\""), Some("1700000000"));
        let decoded = decode_version(&token);
        assert_eq!(decoded.e_tag.as_deref(), Some("\"abc\""));
        assert_eq!(decoded.version.as_deref(), Some("1700000000"));
    }

    #[test]
    fn version_token_tolerates_missing_generation() {
        let decoded = decode_version(&encode_version(Some("etag"), None));
        assert_eq!(decoded.e_tag.as_deref(), Some("etag"));
        assert!(decoded.version.is_none());
    }

    #[test]
    fn empty_bucket_is_rejected() {
        assert!(matches!(bucket_name("  "), Err(Error::InvalidInput(_))));
        assert_eq!(bucket_name("ledger-bucket/").unwrap(), "ledger-bucket");
    }
}
