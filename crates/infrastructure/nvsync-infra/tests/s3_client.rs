use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Response, StatusCode, Uri};
use axum::routing::get;
use axum::Router;
use futures::stream::{self, StreamExt};
use nvsync_infra::{ObjectStore, S3ObjectStore, S3Settings, StoreError};
use percent_encoding::percent_decode_str;
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

const PAGE_SIZE: usize = 2;
const BUCKET: &str = "data";

#[derive(Default)]
struct MockS3 {
    objects: BTreeMap<String, Vec<u8>>,
    list_calls: usize,
    unsigned_requests: usize,
}

type Shared = Arc<Mutex<MockS3>>;

fn record_auth(state: &Shared, headers: &HeaderMap) {
    let signed = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("AWS4-HMAC-SHA256 Credential=test-key/"))
        && headers.contains_key("x-amz-date")
        && headers.get("x-amz-content-sha256").is_some_and(|v| v == "UNSIGNED-PAYLOAD");
    if !signed {
        state.lock().unwrap().unsigned_requests += 1;
    }
}

fn query_params(uri: &Uri) -> BTreeMap<String, String> {
    uri.query()
        .unwrap_or("")
        .split('&')
        .filter(|kv| !kv.is_empty())
        .map(|kv| {
            let (k, v) = kv.split_once('=').unwrap_or((kv, ""));
            (
                percent_decode_str(k).decode_utf8_lossy().into_owned(),
                percent_decode_str(v).decode_utf8_lossy().into_owned(),
            )
        })
        .collect()
}

fn xml(status: StatusCode, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/xml")
        .body(Body::from(body))
        .unwrap()
}

fn not_found(key: &str) -> Response<Body> {
    xml(
        StatusCode::NOT_FOUND,
        format!("<Error><Code>NoSuchKey</Code><Message>{key}</Message></Error>"),
    )
}

async fn list_buckets(State(state): State<Shared>, headers: HeaderMap) -> Response<Body> {
    record_auth(&state, &headers);
    xml(
        StatusCode::OK,
        format!(
            "<ListAllMyBucketsResult><Buckets><Bucket><Name>{BUCKET}</Name>\
             <CreationDate>2024-01-01T00:00:00.000Z</CreationDate></Bucket></Buckets>\
             </ListAllMyBucketsResult>"
        ),
    )
}

async fn list_objects(
    State(state): State<Shared>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response<Body> {
    record_auth(&state, &headers);
    if bucket != BUCKET {
        return xml(
            StatusCode::NOT_FOUND,
            "<Error><Code>NoSuchBucket</Code><Message>missing</Message></Error>".into(),
        );
    }
    let params = query_params(&uri);
    let prefix = params.get("prefix").cloned().unwrap_or_default();
    let delimiter = params.get("delimiter").cloned();
    let start: usize = params
        .get("continuation-token")
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);

    let mut guard = state.lock().unwrap();
    guard.list_calls += 1;

    let mut entries: Vec<(String, Option<usize>)> = Vec::new();
    let mut prefixes = BTreeSet::new();
    for (key, data) in guard.objects.range(prefix.clone()..) {
        let Some(rest) = key.strip_prefix(&prefix) else {
            break;
        };
        match (&delimiter, rest.find('/')) {
            (Some(_), Some(idx)) => {
                prefixes.insert(format!("{prefix}{}", &rest[..=idx]));
            }
            _ => entries.push((key.clone(), Some(data.len()))),
        }
    }
    entries.extend(prefixes.into_iter().map(|p| (p, None)));

    let page: Vec<_> = entries.iter().skip(start).take(PAGE_SIZE).collect();
    let next = start + page.len();
    let truncated = next < entries.len();

    let mut body = String::from("<ListBucketResult>");
    body.push_str(&format!("<IsTruncated>{truncated}</IsTruncated>"));
    if truncated {
        body.push_str(&format!("<NextContinuationToken>{next}</NextContinuationToken>"));
    }
    for (key, size) in page {
        match size {
            Some(size) => body.push_str(&format!(
                "<Contents><Key>{key}</Key><LastModified>2024-01-01T00:00:00.000Z</LastModified>\
                 <ETag>\"e\"</ETag><Size>{size}</Size></Contents>"
            )),
            None => body.push_str(&format!("<CommonPrefixes><Prefix>{key}</Prefix></CommonPrefixes>")),
        }
    }
    body.push_str("</ListBucketResult>");
    xml(StatusCode::OK, body)
}

async fn get_object(
    State(state): State<Shared>,
    Path((_bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response<Body> {
    record_auth(&state, &headers);
    match state.lock().unwrap().objects.get(&key) {
        Some(data) => Response::builder()
            .header("content-length", data.len())
            .header("last-modified", "Mon, 01 Jan 2024 00:00:00 GMT")
            .body(Body::from(data.clone()))
            .unwrap(),
        None => not_found(&key),
    }
}

async fn head_object(
    State(state): State<Shared>,
    Path((_bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response<Body> {
    record_auth(&state, &headers);
    match state.lock().unwrap().objects.get(&key) {
        Some(data) => Response::builder()
            .header("content-length", data.len())
            .header("last-modified", "Mon, 01 Jan 2024 00:00:00 GMT")
            .header("etag", "\"abc\"")
            .body(Body::empty())
            .unwrap(),
        None => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap(),
    }
}

async fn put_object(
    State(state): State<Shared>,
    Path((_bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    record_auth(&state, &headers);
    state.lock().unwrap().objects.insert(key, body.to_vec());
    Response::builder().body(Body::empty()).unwrap()
}

async fn delete_object(
    State(state): State<Shared>,
    Path((_bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response<Body> {
    record_auth(&state, &headers);
    state.lock().unwrap().objects.remove(&key);
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .unwrap()
}

async fn start_mock_s3(state: Shared) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/", get(list_buckets))
        .route("/:bucket", get(list_objects))
        .route(
            "/:bucket/*key",
            get(get_object)
                .head(head_object)
                .put(put_object)
                .delete(delete_object),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

fn store_for(addr: SocketAddr, bucket: Option<&str>) -> S3ObjectStore {
    S3ObjectStore::new(
        reqwest::Client::new(),
        S3Settings {
            endpoint: addr.to_string(),
            region: "us-east-1".into(),
            access_key_id: "test-key".into(),
            secret_access_key: "test-secret".into(),
            bucket: bucket.map(str::to_string),
        },
    )
    .unwrap()
}

fn seeded(keys: &[(&str, &[u8])]) -> Shared {
    let mut mock = MockS3::default();
    for (k, v) in keys {
        mock.objects.insert(k.to_string(), v.to_vec());
    }
    Arc::new(Mutex::new(mock))
}

#[tokio::test]
async fn recursive_listing_follows_continuation_tokens() {
    let state = seeded(&[
        ("a.txt", b"1"),
        ("dir/b.txt", b"22"),
        ("dir/c.txt", b"333"),
        ("dir/sub/d.txt", b"4444"),
        ("e.txt", b"55555"),
    ]);
    let (addr, _server) = start_mock_s3(state.clone()).await;
    let store = store_for(addr, Some(BUCKET));

    let listed = store.list_objects("", true).await.unwrap();
    let keys: Vec<&str> = listed.iter().map(|o| o.key.as_str()).collect();

    assert_eq!(
        keys,
        vec!["a.txt", "dir/b.txt", "dir/c.txt", "dir/sub/d.txt", "e.txt"]
    );
    assert_eq!(listed[3].size, 4);
    assert!(listed[0].last_modified.is_some());
    assert_eq!(listed[0].etag.as_deref(), Some("e"));

    let guard = state.lock().unwrap();
    assert_eq!(guard.list_calls, 3);
    assert_eq!(guard.unsigned_requests, 0);
}

#[tokio::test]
async fn flat_listing_reports_common_prefixes_as_markers() {
    let state = seeded(&[("a.txt", b"1"), ("dir/b.txt", b"2"), ("dir/sub/c.txt", b"3")]);
    let (addr, _server) = start_mock_s3(state).await;
    let store = store_for(addr, Some(BUCKET));

    let listed = store.list_objects("", false).await.unwrap();
    let markers: Vec<&str> = listed
        .iter()
        .filter(|o| o.is_directory_marker())
        .map(|o| o.key.as_str())
        .collect();
    let files: Vec<&str> = listed
        .iter()
        .filter(|o| !o.is_directory_marker())
        .map(|o| o.key.as_str())
        .collect();

    assert_eq!(markers, vec!["dir/"]);
    assert_eq!(files, vec!["a.txt"]);
}

#[tokio::test]
async fn stat_distinguishes_missing_from_present() {
    let state = seeded(&[("models/w.bin", b"12345")]);
    let (addr, _server) = start_mock_s3(state).await;
    let store = store_for(addr, Some(BUCKET));

    assert!(store.stat_object("models/none.bin").await.unwrap().is_none());

    let info = store.stat_object("models/w.bin").await.unwrap().unwrap();
    assert_eq!(info.size, 5);
    assert_eq!(info.etag.as_deref(), Some("abc"));
    assert_eq!(info.last_modified.unwrap().timestamp(), 1_704_067_200);
}

#[tokio::test]
async fn put_get_delete_round_trip_with_encoded_keys() {
    let state = seeded(&[]);
    let (addr, _server) = start_mock_s3(state.clone()).await;
    let store = store_for(addr, Some(BUCKET));
    let key = "dir/with space+plus.txt";

    let body = stream::iter(vec![
        Ok(bytes::Bytes::from_static(b"hello ")),
        Ok(bytes::Bytes::from_static(b"world")),
    ])
    .boxed();
    store.put_object(key, body, 11).await.unwrap();
    assert_eq!(state.lock().unwrap().objects.get(key).unwrap(), b"hello world");

    let obj = store.get_object(key).await.unwrap();
    assert_eq!(obj.size, 11);
    let mut fetched = Vec::new();
    let mut body = obj.body;
    while let Some(chunk) = body.next().await {
        fetched.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(fetched, b"hello world");

    store.delete_object(key).await.unwrap();
    assert!(state.lock().unwrap().objects.is_empty());
    assert_eq!(state.lock().unwrap().unsigned_requests, 0);
}

#[tokio::test]
async fn missing_object_and_bucket_map_to_typed_errors() {
    let state = seeded(&[]);
    let (addr, _server) = start_mock_s3(state).await;

    let store = store_for(addr, Some(BUCKET));
    assert!(matches!(
        store.get_object("nope").await,
        Err(StoreError::NotFound(k)) if k == "nope"
    ));

    let wrong = store_for(addr, Some("other"));
    match wrong.list_objects("", true).await {
        Err(StoreError::Status {
            status, message, ..
        }) => {
            assert_eq!(status, 404);
            assert!(message.starts_with("NoSuchBucket"));
        }
        other => panic!("unexpected: {other:?}"),
    }

    let unbound = store_for(addr, None);
    assert!(matches!(
        unbound.list_objects("", true).await,
        Err(StoreError::NoBucket)
    ));
}

#[tokio::test]
async fn bucket_listing_works_without_a_bound_bucket() {
    let state = seeded(&[]);
    let (addr, _server) = start_mock_s3(state).await;
    let store = store_for(addr, None);

    let buckets = store.list_buckets().await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].name, BUCKET);
    assert!(buckets[0].created_at.is_some());
}
