use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::io;

/// Body handed to `put_object`. Reading from disk yields `io::Error`s.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("no bucket configured")]
    NoBucket,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{operation} returned HTTP {status}: {message}")]
    Status {
        operation: &'static str,
        status: u16,
        message: String,
    },
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// One entry of a listing or a stat call.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// Directory markers synthesized from common prefixes carry no timestamp.
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

impl ObjectInfo {
    pub fn is_directory_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketInfo {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

pub struct ObjectStream {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub body: BoxStream<'static, Result<Bytes, StoreError>>,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("size", &self.size)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

/// Flat key-value object store. Implementations must be cheap to share across tasks.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket the store is bound to, if any.
    fn bucket(&self) -> Option<&str>;

    /// Non-recursive listings report common prefixes as directory markers.
    async fn list_objects(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectInfo>, StoreError>;

    /// `Ok(None)` when the key does not exist.
    async fn stat_object(&self, key: &str) -> Result<Option<ObjectInfo>, StoreError>;

    async fn get_object(&self, key: &str) -> Result<ObjectStream, StoreError>;

    async fn put_object(&self, key: &str, body: ByteStream, size: u64) -> Result<(), StoreError>;

    async fn delete_object(&self, key: &str) -> Result<(), StoreError>;

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError>;
}
