//! Minimal S3 REST client over reqwest: path-style addressing, SigV4, single-part PUT.

pub mod sigv4;
pub mod xml;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{
    AsHeaderName, HeaderMap, AUTHORIZATION, CONTENT_LENGTH, ETAG, LAST_MODIFIED,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use tracing::debug;

use crate::store::{BucketInfo, ByteStream, ObjectInfo, ObjectStore, ObjectStream, StoreError};
use sigv4::Credentials;

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: Option<String>,
}

pub struct S3ObjectStore {
    client: Client,
    base: String,
    region: String,
    creds: Credentials,
    bucket: Option<String>,
}

impl S3ObjectStore {
    /// An endpoint without a scheme is taken as plain `http://`.
    pub fn new(client: Client, settings: S3Settings) -> Result<Self, StoreError> {
        let endpoint = settings.endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(StoreError::InvalidRequest("empty endpoint".into()));
        }
        let base = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };
        Url::parse(&base)
            .map_err(|e| StoreError::InvalidRequest(format!("bad endpoint {base}: {e}")))?;

        Ok(Self {
            client,
            base,
            region: settings.region,
            creds: Credentials {
                access_key_id: settings.access_key_id,
                secret_access_key: settings.secret_access_key,
            },
            bucket: settings.bucket.filter(|b| !b.is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base
    }

    fn require_bucket(&self) -> Result<&str, StoreError> {
        self.bucket.as_deref().ok_or(StoreError::NoBucket)
    }

    fn url(
        &self,
        bucket: Option<&str>,
        key: Option<&str>,
        query: &[(&str, &str)],
    ) -> Result<Url, StoreError> {
        let mut raw = self.base.clone();
        raw.push('/');
        if let Some(bucket) = bucket {
            raw.push_str(&sigv4::uri_encode(bucket));
        }
        if let Some(key) = key {
            raw.push('/');
            raw.push_str(&sigv4::encode_key(key));
        }
        if !query.is_empty() {
            raw.push('?');
            raw.push_str(&sigv4::canonical_query(query));
        }
        Url::parse(&raw).map_err(|e| StoreError::InvalidRequest(format!("bad url {raw}: {e}")))
    }

    fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, StoreError> {
        let signed = sigv4::sign(&method, &url, &self.creds, &self.region, Utc::now())?;
        Ok(self
            .client
            .request(method, url)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header(AUTHORIZATION, signed.authorization))
    }
}

async fn check(resp: Response, operation: &'static str) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = match xml::decode::<xml::ErrorBody>(&body) {
        Ok(err) if !err.code.is_empty() => format!("{}: {}", err.code, err.message),
        _ => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    Err(StoreError::Status {
        operation,
        status: status.as_u16(),
        message,
    })
}

fn header_str(headers: &HeaderMap, name: impl AsHeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_size(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, CONTENT_LENGTH).and_then(|v| v.trim().parse().ok())
}

fn header_modified(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    header_str(headers, LAST_MODIFIED)
        .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    async fn list_objects(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectInfo>, StoreError> {
        let bucket = self.require_bucket()?;
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let url = {
                let mut query = vec![("list-type", "2"), ("prefix", prefix)];
                if !recursive {
                    query.push(("delimiter", "/"));
                }
                if let Some(t) = token.as_deref() {
                    query.push(("continuation-token", t));
                }
                self.url(Some(bucket), None, &query)?
            };

            let resp = self.request(Method::GET, url)?.send().await?;
            let body = check(resp, "ListObjectsV2").await?.text().await?;
            let page: xml::ListBucketResult = xml::decode(&body)?;
            pages += 1;

            objects.extend(page.contents.into_iter().map(ObjectInfo::from));
            objects.extend(page.common_prefixes.into_iter().map(|p| ObjectInfo {
                key: p.prefix,
                size: 0,
                last_modified: None,
                etag: None,
            }));

            match (page.is_truncated, page.next_continuation_token) {
                (true, Some(next)) if token.as_deref() != Some(next.as_str()) => {
                    token = Some(next)
                }
                _ => break,
            }
        }

        debug!(
            "Listed {} entries under '{}' in {} page(s)",
            objects.len(),
            prefix,
            pages
        );
        Ok(objects)
    }

    async fn stat_object(&self, key: &str) -> Result<Option<ObjectInfo>, StoreError> {
        let url = self.url(Some(self.require_bucket()?), Some(key), &[])?;
        let resp = self.request(Method::HEAD, url)?.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check(resp, "HeadObject").await?;
        let headers = resp.headers();

        Ok(Some(ObjectInfo {
            key: key.to_string(),
            size: header_size(headers).unwrap_or(0),
            last_modified: header_modified(headers),
            etag: header_str(headers, ETAG).map(xml::clean_etag),
        }))
    }

    async fn get_object(&self, key: &str) -> Result<ObjectStream, StoreError> {
        let url = self.url(Some(self.require_bucket()?), Some(key), &[])?;
        let resp = self.request(Method::GET, url)?.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let resp = check(resp, "GetObject").await?;
        let size = header_size(resp.headers())
            .or_else(|| resp.content_length())
            .unwrap_or(0);
        let last_modified = header_modified(resp.headers());

        Ok(ObjectStream {
            size,
            last_modified,
            body: resp.bytes_stream().map_err(StoreError::from).boxed(),
        })
    }

    async fn put_object(&self, key: &str, body: ByteStream, size: u64) -> Result<(), StoreError> {
        let url = self.url(Some(self.require_bucket()?), Some(key), &[])?;
        let resp = self
            .request(Method::PUT, url)?
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        check(resp, "PutObject").await?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        let url = self.url(Some(self.require_bucket()?), Some(key), &[])?;
        let resp = self.request(Method::DELETE, url)?.send().await?;
        // S3 answers 204 for missing keys too; some compatible stores say 404.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(resp, "DeleteObject").await?;
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError> {
        let url = self.url(None, None, &[])?;
        let resp = self.request(Method::GET, url)?.send().await?;
        let body = check(resp, "ListBuckets").await?.text().await?;
        let parsed: xml::ListAllMyBucketsResult = xml::decode(&body)?;
        Ok(parsed
            .buckets
            .bucket
            .into_iter()
            .map(BucketInfo::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(endpoint: &str) -> S3Settings {
        S3Settings {
            endpoint: endpoint.into(),
            region: "us-east-1".into(),
            access_key_id: "id".into(),
            secret_access_key: "secret".into(),
            bucket: Some("data".into()),
        }
    }

    #[test]
    fn endpoint_without_scheme_defaults_to_http() {
        let store = S3ObjectStore::new(Client::new(), settings("minio.local:9000/")).unwrap();
        assert_eq!(store.endpoint(), "http://minio.local:9000");

        let tls = S3ObjectStore::new(Client::new(), settings("https://s3.example.com")).unwrap();
        assert_eq!(tls.endpoint(), "https://s3.example.com");
    }

    #[test]
    fn object_urls_are_path_style_and_encoded() {
        let store = S3ObjectStore::new(Client::new(), settings("http://localhost:9000")).unwrap();
        let url = store.url(Some("data"), Some("dir/a b.txt"), &[]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/data/dir/a%20b.txt");

        // Empty segments and backslashes are part of the key and must survive.
        let odd = store.url(Some("data"), Some("/dir//a\\b.txt"), &[]).unwrap();
        assert_eq!(odd.path(), "/data//dir//a%5Cb.txt");

        let listing = store
            .url(Some("data"), None, &[("prefix", "dir/"), ("list-type", "2")])
            .unwrap();
        assert_eq!(listing.query(), Some("list-type=2&prefix=dir%2F"));
    }

    #[test]
    fn empty_bucket_name_counts_as_unset() {
        let mut s = settings("localhost");
        s.bucket = Some(String::new());
        let store = S3ObjectStore::new(Client::new(), s).unwrap();
        assert!(store.bucket().is_none());
        assert!(matches!(store.require_bucket(), Err(StoreError::NoBucket)));
    }
}
