//! Response bodies of the S3 REST API that the client decodes.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::store::{BucketInfo, ObjectInfo, StoreError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default)]
    pub next_continuation_token: Option<String>,
    #[serde(default)]
    pub contents: Vec<Contents>,
    #[serde(default)]
    pub common_prefixes: Vec<CommonPrefix>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Contents {
    pub key: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default, rename = "ETag")]
    pub etag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommonPrefix {
    pub prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListAllMyBucketsResult {
    #[serde(default)]
    pub buckets: Buckets,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Buckets {
    #[serde(default)]
    pub bucket: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Bucket {
    pub name: String,
    #[serde(default)]
    pub creation_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

pub fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, StoreError> {
    quick_xml::de::from_str(body).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Strip the quotes S3 wraps around ETags.
pub fn clean_etag(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl From<Contents> for ObjectInfo {
    fn from(c: Contents) -> Self {
        ObjectInfo {
            last_modified: c.last_modified.as_deref().and_then(parse_timestamp),
            etag: c.etag.as_deref().map(clean_etag),
            size: c.size,
            key: c.key,
        }
    }
}

impl From<Bucket> for BucketInfo {
    fn from(b: Bucket) -> Self {
        BucketInfo {
            created_at: b.creation_date.as_deref().and_then(parse_timestamp),
            name: b.name,
        }
    }
}
