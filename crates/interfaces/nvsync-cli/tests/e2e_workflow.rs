use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{Response, StatusCode, Uri};
use axum::routing::get;
use axum::Router;
use camino::Utf8PathBuf;
use chrono::{DateTime, SecondsFormat, Utc};
use nvsync_cli::commands::{self, Listing, TransferArgs};
use nvsync_cli::{exit_code, EXIT_PARTIAL_FAILURE};
use nvsync_config::Config;
use nvsync_pipeline::RunStatus;
use percent_encoding::percent_decode_str;
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const BUCKET: &str = "volume";

#[derive(Default)]
struct Bucket {
    objects: BTreeMap<String, (Vec<u8>, DateTime<Utc>)>,
    reject_puts: BTreeSet<String>,
}

type Shared = Arc<Mutex<Bucket>>;

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|kv| {
        let (k, v) = kv.split_once('=').unwrap_or((kv, ""));
        (k == name).then(|| percent_decode_str(v).decode_utf8_lossy().into_owned())
    })
}

fn reply(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    Response::builder().status(status).body(body.into()).unwrap()
}

async fn list_buckets() -> Response<Body> {
    reply(
        StatusCode::OK,
        format!(
            "<ListAllMyBucketsResult><Buckets><Bucket><Name>{BUCKET}</Name>\
             <CreationDate>2024-03-01T08:00:00.000Z</CreationDate></Bucket></Buckets>\
             </ListAllMyBucketsResult>"
        ),
    )
}

async fn list_objects(State(state): State<Shared>, uri: Uri) -> Response<Body> {
    let prefix = query_param(&uri, "prefix").unwrap_or_default();
    let delimited = query_param(&uri, "delimiter").is_some();
    let guard = state.lock().unwrap();

    let mut body = String::from("<ListBucketResult><IsTruncated>false</IsTruncated>");
    let mut prefixes = BTreeSet::new();
    for (key, (data, modified)) in guard.objects.range(prefix.clone()..) {
        let Some(rest) = key.strip_prefix(&prefix) else {
            break;
        };
        if let (true, Some(idx)) = (delimited, rest.find('/')) {
            prefixes.insert(format!("{prefix}{}", &rest[..=idx]));
            continue;
        }
        body.push_str(&format!(
            "<Contents><Key>{key}</Key><LastModified>{}</LastModified><Size>{}</Size></Contents>",
            modified.to_rfc3339_opts(SecondsFormat::Millis, true),
            data.len()
        ));
    }
    for p in prefixes {
        body.push_str(&format!("<CommonPrefixes><Prefix>{p}</Prefix></CommonPrefixes>"));
    }
    body.push_str("</ListBucketResult>");
    reply(StatusCode::OK, body)
}

async fn get_object(
    State(state): State<Shared>,
    Path((_bucket, key)): Path<(String, String)>,
) -> Response<Body> {
    match state.lock().unwrap().objects.get(&key) {
        Some((data, modified)) => Response::builder()
            .header("content-length", data.len())
            .header("last-modified", modified.to_rfc2822())
            .body(Body::from(data.clone()))
            .unwrap(),
        None => reply(
            StatusCode::NOT_FOUND,
            "<Error><Code>NoSuchKey</Code><Message>missing</Message></Error>",
        ),
    }
}

async fn put_object(
    State(state): State<Shared>,
    Path((_bucket, key)): Path<(String, String)>,
    body: Bytes,
) -> Response<Body> {
    let mut guard = state.lock().unwrap();
    if guard.reject_puts.contains(&key) {
        return reply(
            StatusCode::FORBIDDEN,
            "<Error><Code>AccessDenied</Code><Message>read-only key</Message></Error>",
        );
    }
    guard.objects.insert(key, (body.to_vec(), Utc::now()));
    reply(StatusCode::OK, Body::empty())
}

async fn delete_object(
    State(state): State<Shared>,
    Path((_bucket, key)): Path<(String, String)>,
) -> Response<Body> {
    state.lock().unwrap().objects.remove(&key);
    reply(StatusCode::NO_CONTENT, Body::empty())
}

async fn start_mock_s3(state: Shared) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/", get(list_buckets))
        .route("/:bucket", get(list_objects))
        .route(
            "/:bucket/*key",
            get(get_object).put(put_object).delete(delete_object),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

fn config(addr: SocketAddr, bucket: Option<&str>, mount: &Utf8PathBuf) -> Config {
    Config {
        access_key_id: "test-key".into(),
        secret_access_key: "test-secret".into(),
        endpoint: format!("http://{addr}"),
        region: "us-east-1".into(),
        bucket: bucket.map(str::to_string),
        mount_path: mount.clone(),
    }
}

fn write(root: &Utf8PathBuf, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn keys(state: &Shared) -> Vec<String> {
    state.lock().unwrap().objects.keys().cloned().collect()
}

#[tokio::test]
async fn push_pull_and_remove_through_the_s3_client() {
    let state = Shared::default();
    let (addr, server) = start_mock_s3(state.clone()).await;

    let work_a = tempdir().unwrap();
    let mount_a = Utf8PathBuf::from_path_buf(work_a.path().to_path_buf()).unwrap();
    write(&mount_a, "models/weights.bin", b"0123456789");
    write(&mount_a, "models/config.json", b"{}");
    write(&mount_a, "models/scratch.tmp", b"junk");
    let cfg_a = config(addr, Some(BUCKET), &mount_a);

    // Phase 1: push with an exclusion
    let push_args = TransferArgs {
        exclude: vec!["models/*.tmp".into()],
        threads: 4,
        ..TransferArgs::default()
    };
    let report = commands::cmd_push(&cfg_a, &push_args, CancellationToken::new())
        .await
        .expect("push failed");
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.stats.transferred, 2);
    assert_eq!(report.stats.bytes_transferred, 12);
    assert_eq!(keys(&state), vec!["models/config.json", "models/weights.bin"]);

    // Phase 2: second push is a no-op
    let report = commands::cmd_push(&cfg_a, &push_args, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.stats.transferred, 0);
    assert_eq!(report.stats.skipped, 2);

    // Phase 3: pull into a fresh, not yet existing mount
    let work_b = tempdir().unwrap();
    let mount_b = Utf8PathBuf::from_path_buf(work_b.path().join("mount")).unwrap();
    let cfg_b = config(addr, Some(BUCKET), &mount_b);
    let pull_args = TransferArgs {
        prefix: "models/".into(),
        threads: 2,
        ..TransferArgs::default()
    };
    let report = commands::cmd_pull(&cfg_b, &pull_args, CancellationToken::new())
        .await
        .expect("pull failed");
    assert_eq!(report.stats.transferred, 2);
    assert_eq!(
        std::fs::read(mount_b.join("models/weights.bin")).unwrap(),
        b"0123456789"
    );
    assert!(!mount_b.join("models/scratch.tmp").exists());

    let report = commands::cmd_pull(&cfg_b, &pull_args, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.stats.transferred, 0);
    assert_eq!(report.stats.skipped, 2);

    // Phase 4: flat and recursive listings
    let Listing::Objects(flat) = commands::cmd_ls(&cfg_a, "", false, false).await.unwrap() else {
        panic!("expected objects");
    };
    assert_eq!(flat.len(), 1);
    assert_eq!(flat[0].key, "models/");
    assert!(flat[0].is_directory_marker());

    let Listing::Objects(all) = commands::cmd_ls(&cfg_a, "models", true, true).await.unwrap()
    else {
        panic!("expected objects");
    };
    assert_eq!(all.len(), 2);

    // Phase 5: dry-run remove changes nothing, the real one empties the prefix
    let report = commands::cmd_rm(
        &cfg_a,
        Vec::new(),
        Some("models/".into()),
        true,
        true,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.stats.would_delete, 2);
    assert_eq!(keys(&state).len(), 2);

    let report = commands::cmd_rm(
        &cfg_a,
        Vec::new(),
        Some("models/".into()),
        true,
        false,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.stats.deleted, 2);
    assert!(keys(&state).is_empty());

    server.abort();
}

#[tokio::test]
async fn rejected_upload_is_reported_as_partial_failure() {
    let state = Shared::default();
    state
        .lock()
        .unwrap()
        .reject_puts
        .insert("locked.txt".into());
    let (addr, server) = start_mock_s3(state.clone()).await;

    let work = tempdir().unwrap();
    let mount = Utf8PathBuf::from_path_buf(work.path().to_path_buf()).unwrap();
    write(&mount, "locked.txt", b"nope");
    write(&mount, "open.txt", b"yes");
    let cfg = config(addr, Some(BUCKET), &mount);

    let args = TransferArgs {
        threads: 1,
        json: true,
        ..TransferArgs::default()
    };
    let report = commands::cmd_push(&cfg, &args, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.transferred, 1);
    assert_eq!(exit_code(&report), EXIT_PARTIAL_FAILURE);
    assert_eq!(keys(&state), vec!["open.txt"]);

    server.abort();
}

#[tokio::test]
async fn ls_without_bucket_lists_buckets_and_transfers_require_one() {
    let (addr, server) = start_mock_s3(Shared::default()).await;
    let work = tempdir().unwrap();
    let mount = Utf8PathBuf::from_path_buf(work.path().to_path_buf()).unwrap();
    let cfg = config(addr, None, &mount);

    let Listing::Buckets(buckets) = commands::cmd_ls(&cfg, "", true, false).await.unwrap() else {
        panic!("expected buckets");
    };
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].name, BUCKET);

    let err = commands::cmd_pull(&cfg, &TransferArgs::default(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("S3_BUCKET"));

    let err = commands::cmd_rm(
        &config(addr, Some(BUCKET), &mount),
        Vec::new(),
        None,
        true,
        false,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("--prefix"));

    server.abort();
}

#[tokio::test]
async fn unreachable_endpoint_is_a_fatal_error() {
    // Bind then drop to get a port with nothing listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let work = tempdir().unwrap();
    let mount = Utf8PathBuf::from_path_buf(work.path().to_path_buf()).unwrap();
    let cfg = config(addr, Some(BUCKET), &mount);

    let res = commands::cmd_pull(&cfg, &TransferArgs::default(), CancellationToken::new()).await;
    assert!(res.is_err());
}
