//! Object storage for uploads and stage outputs.
//!
//! Presigned URL issuance is the storage backend's concern; the pipeline only
//! passes the resulting URL through.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

/// Expiry used for presigned URLs handed to clients.
pub const PRESIGN_EXPIRY: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid object location: {0}")]
    InvalidLocation(String),

    #[error("object storage error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// URL a client can `PUT` the object body to.
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> Result<String, StorageError>;

    /// URL a client can `GET` the object from.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;
}

#[async_trait]
impl<S> ObjectStore for Arc<S>
where
    S: ObjectStore + ?Sized,
{
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        (**self).put_object(bucket, key, body, content_type).await
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        (**self).presign_put(bucket, key, content_type, expires_in).await
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        (**self).presign_get(bucket, key, expires_in).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// In-memory object store for tests/dev.
///
/// Presigned URLs use a `memory://` scheme and are not dereferenceable.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .ok()?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }
}

fn validate(bucket: &str, key: &str) -> Result<(), StorageError> {
    if bucket.trim().is_empty() {
        return Err(StorageError::InvalidLocation("bucket is empty".to_string()));
    }
    if key.trim().is_empty() {
        return Err(StorageError::InvalidLocation("key is empty".to_string()));
    }
    if key.starts_with('/') || key.split('/').any(|seg| seg == "..") {
        return Err(StorageError::InvalidLocation(format!("key {key:?} is not a relative path")));
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        validate(bucket, key)?;
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::Backend("object store lock poisoned".to_string()))?;
        objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        validate(bucket, key)?;
        let mut url = format!(
            "memory://{bucket}/{key}?method=PUT&expires={}",
            expires_in.as_secs()
        );
        if let Some(ct) = content_type {
            url.push_str("&content-type=");
            url.push_str(ct);
        }
        Ok(url)
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        validate(bucket, key)?;
        Ok(format!(
            "memory://{bucket}/{key}?method=GET&expires={}",
            expires_in.as_secs()
        ))
    }
}
