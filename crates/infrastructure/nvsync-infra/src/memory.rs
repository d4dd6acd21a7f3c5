use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::store::{BucketInfo, ByteStream, ObjectInfo, ObjectStore, ObjectStream, StoreError};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Faults {
    failing: HashSet<String>,
    stalling: HashSet<String>,
    short_body: HashSet<String>,
    listing: bool,
}

/// In-process object store with failure injection, for tests and dry experiments.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    bucket: Option<String>,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    faults: Mutex<Faults>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn injected(operation: &'static str, key: &str) -> StoreError {
    StoreError::Status {
        operation,
        status: 500,
        message: format!("injected failure for {key}"),
    }
}

impl MemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: Some(bucket.to_string()),
            ..Self::default()
        }
    }

    pub fn without_bucket() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, data: impl Into<Bytes>, last_modified: DateTime<Utc>) {
        lock(&self.objects).insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                last_modified,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        lock(&self.objects).get(key).map(|o| o.data.clone())
    }

    pub fn last_modified(&self, key: &str) -> Option<DateTime<Utc>> {
        lock(&self.objects).get(key).map(|o| o.last_modified)
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Every operation on `key` fails with a 500.
    pub fn fail_on(&self, key: &str) {
        lock(&self.faults).failing.insert(key.to_string());
    }

    /// Reads and writes of `key` never complete.
    pub fn stall_on(&self, key: &str) {
        lock(&self.faults).stalling.insert(key.to_string());
    }

    /// `get_object` on `key` announces the full size but delivers half the bytes.
    pub fn short_body(&self, key: &str) {
        lock(&self.faults).short_body.insert(key.to_string());
    }

    pub fn fail_listing(&self) {
        lock(&self.faults).listing = true;
    }

    fn check(&self, operation: &'static str, key: &str) -> Result<bool, StoreError> {
        let faults = lock(&self.faults);
        if faults.failing.contains(key) {
            return Err(injected(operation, key));
        }
        Ok(faults.stalling.contains(key))
    }

    fn info(key: &str, obj: &StoredObject) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: obj.data.len() as u64,
            last_modified: Some(obj.last_modified),
            etag: None,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    async fn list_objects(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectInfo>, StoreError> {
        self.bucket.as_deref().ok_or(StoreError::NoBucket)?;
        if lock(&self.faults).listing {
            return Err(injected("ListObjectsV2", prefix));
        }

        let objects = lock(&self.objects);
        let mut out = Vec::new();
        let mut common = BTreeSet::new();
        for (key, obj) in objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            match rest.find('/') {
                Some(idx) if !recursive => {
                    common.insert(format!("{prefix}{}", &rest[..=idx]));
                }
                _ => out.push(Self::info(key, obj)),
            }
        }
        out.extend(common.into_iter().map(|key| ObjectInfo {
            key,
            size: 0,
            last_modified: None,
            etag: None,
        }));
        Ok(out)
    }

    async fn stat_object(&self, key: &str) -> Result<Option<ObjectInfo>, StoreError> {
        self.check("HeadObject", key)?;
        Ok(lock(&self.objects).get(key).map(|o| Self::info(key, o)))
    }

    async fn get_object(&self, key: &str) -> Result<ObjectStream, StoreError> {
        if self.check("GetObject", key)? {
            futures::future::pending::<()>().await;
        }
        let obj = lock(&self.objects)
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let size = obj.data.len() as u64;
        let data = if lock(&self.faults).short_body.contains(key) {
            obj.data.slice(..obj.data.len() / 2)
        } else {
            obj.data
        };

        Ok(ObjectStream {
            size,
            last_modified: Some(obj.last_modified),
            body: stream::iter(vec![Ok(data)]).boxed(),
        })
    }

    async fn put_object(
        &self,
        key: &str,
        mut body: ByteStream,
        size: u64,
    ) -> Result<(), StoreError> {
        if self.check("PutObject", key)? {
            futures::future::pending::<()>().await;
        }
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        if buf.len() as u64 != size {
            return Err(StoreError::InvalidRequest(format!(
                "{key}: declared {size} bytes, received {}",
                buf.len()
            )));
        }
        self.insert(key, buf.freeze(), Utc::now());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.check("DeleteObject", key)?;
        lock(&self.objects).remove(key);
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError> {
        Ok(self
            .bucket
            .iter()
            .map(|name| BucketInfo {
                name: name.clone(),
                created_at: None,
            })
            .collect())
    }
}
