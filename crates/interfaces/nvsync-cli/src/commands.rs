use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use humansize::{format_size, BINARY};
use nvsync_config::{clamp_threads, Config};
use nvsync_infra::{
    default_http_client, BucketInfo, ObjectInfo, ObjectStore, S3ObjectStore, S3Settings,
};
use nvsync_pipeline::{
    default_engine, Direction, RemoveTarget, RunReport, ScanDepth, SyncError, SyncEvent,
    SyncOptions, SyncRequest,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::render::{print_removal_summary, print_summary, EventPrinter, RULE};

const EVENT_BUFFER: usize = 256;

/// Flags shared by `pull` and `push`.
#[derive(Debug, Clone, Default)]
pub struct TransferArgs {
    pub prefix: String,
    pub dry_run: bool,
    pub delete: bool,
    /// Ignored by `pull`.
    pub exclude: Vec<String>,
    pub threads: usize,
    pub limit_mb: Option<u64>,
    pub json: bool,
}

impl TransferArgs {
    fn options(&self, direction: Direction) -> SyncOptions {
        SyncOptions {
            prefix: self.prefix.clone(),
            dry_run: self.dry_run,
            delete_stale: self.delete,
            exclude: match direction {
                Direction::Push => self.exclude.clone(),
                Direction::Pull => Vec::new(),
            },
            max_concurrency: clamp_threads(self.threads),
            rate_limit_bytes: self.limit_mb.map(|mb| mb.saturating_mul(1024 * 1024)),
        }
    }
}

/// What `ls` found: objects of the configured bucket, or the bucket list when none is set.
#[derive(Debug, Clone)]
pub enum Listing {
    Buckets(Vec<BucketInfo>),
    Objects(Vec<ObjectInfo>),
}

#[derive(Serialize)]
struct ObjectRow<'a> {
    key: &'a str,
    size: u64,
    last_modified: Option<DateTime<Utc>>,
    dir: bool,
}

#[derive(Serialize)]
struct BucketRow<'a> {
    name: &'a str,
    created_at: Option<DateTime<Utc>>,
}

pub fn connect(cfg: &Config) -> Result<Arc<dyn ObjectStore>> {
    let client = default_http_client().context("Failed to build HTTP client")?;
    let store = S3ObjectStore::new(
        client,
        S3Settings {
            endpoint: cfg.endpoint.clone(),
            region: cfg.region.clone(),
            access_key_id: cfg.access_key_id.clone(),
            secret_access_key: cfg.secret_access_key.clone(),
            bucket: cfg.bucket.clone(),
        },
    )
    .context("Failed to create S3 client")?;
    Ok(Arc::new(store))
}

fn timestamp(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

pub async fn cmd_ls(cfg: &Config, prefix: &str, recursive: bool, json: bool) -> Result<Listing> {
    let engine = default_engine(connect(cfg)?);

    let Some(bucket) = cfg.bucket.as_deref() else {
        let buckets = engine.buckets().await.context("Failed to list buckets")?;
        if json {
            let rows: Vec<BucketRow> = buckets
                .iter()
                .map(|b| BucketRow {
                    name: &b.name,
                    created_at: b.created_at,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        } else {
            println!(
                "Available buckets (set S3_BUCKET via {}/S3_BUCKET file or environment variable to select one):",
                nvsync_config::DEFAULT_CONFIG_DIR
            );
            for b in &buckets {
                println!("  - {} (created: {})", b.name, timestamp(b.created_at));
            }
        }
        return Ok(Listing::Buckets(buckets));
    };

    let depth = if recursive {
        ScanDepth::Recursive
    } else {
        ScanDepth::Flat
    };
    let objects = engine
        .list(prefix, depth)
        .await
        .context("Failed to list objects")?;

    if json {
        let rows: Vec<ObjectRow> = objects
            .iter()
            .map(|o| ObjectRow {
                key: &o.key,
                size: o.size,
                last_modified: o.last_modified,
                dir: o.is_directory_marker(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(Listing::Objects(objects));
    }

    if objects.is_empty() {
        println!("No objects found");
        return Ok(Listing::Objects(objects));
    }

    println!("Listing objects in bucket: {bucket}");
    if !prefix.is_empty() {
        println!("Prefix: {prefix}");
    }
    println!();
    println!("{:<60} {:>15} {:>25}", "KEY", "SIZE", "LAST MODIFIED");
    println!("{RULE}{RULE}{RULE}");
    for o in &objects {
        if o.is_directory_marker() {
            println!("{:<60} {:>15} {:>25}", o.key, "<DIR>", "");
        } else {
            println!(
                "{:<60} {:>15} {:>25}",
                o.key,
                format_size(o.size, BINARY),
                timestamp(o.last_modified)
            );
        }
    }
    println!("\nTotal: {} objects", objects.len());

    Ok(Listing::Objects(objects))
}

/// Render engine events while `run` progresses. The sender half lives inside `run`, so
/// the render loop ends when the run does.
async fn with_progress<F>(
    run: F,
    mut rx: mpsc::Receiver<SyncEvent>,
    quiet: bool,
) -> Result<RunReport, SyncError>
where
    F: Future<Output = Result<RunReport, SyncError>>,
{
    let mut printer = EventPrinter::new(quiet);
    let render = async {
        while let Some(ev) = rx.recv().await {
            printer.handle(ev);
        }
    };
    let (report, ()) = tokio::join!(run, render);
    printer.finish();
    report
}

async fn transfer(
    cfg: &Config,
    direction: Direction,
    args: &TransferArgs,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let bucket = cfg.require_bucket()?;
    let engine = default_engine(connect(cfg)?);

    if !args.json {
        match direction {
            Direction::Pull => println!("Pulling from bucket: {bucket} to {}", cfg.mount_path),
            Direction::Push => println!("Pushing from {} to bucket: {bucket}", cfg.mount_path),
        }
        if !args.prefix.is_empty() {
            println!("Prefix: {}", args.prefix);
        }
        if direction == Direction::Push && !args.exclude.is_empty() {
            println!("Exclude patterns: {:?}", args.exclude);
        }
        if args.dry_run {
            println!("DRY RUN - no changes will be made");
        }
        println!();
    }

    let req = SyncRequest {
        direction,
        mount_root: cfg.mount_path.clone(),
        options: args.options(direction),
    };
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let report = with_progress(engine.reconcile(&req, Some(tx), cancel), rx, args.json)
        .await
        .with_context(|| format!("{direction} failed"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, args.delete);
    }
    Ok(report)
}

pub async fn cmd_pull(
    cfg: &Config,
    args: &TransferArgs,
    cancel: CancellationToken,
) -> Result<RunReport> {
    transfer(cfg, Direction::Pull, args, cancel).await
}

pub async fn cmd_push(
    cfg: &Config,
    args: &TransferArgs,
    cancel: CancellationToken,
) -> Result<RunReport> {
    transfer(cfg, Direction::Push, args, cancel).await
}

pub async fn cmd_rm(
    cfg: &Config,
    keys: Vec<String>,
    prefix: Option<String>,
    recursive: bool,
    dry_run: bool,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let bucket = cfg.require_bucket()?;

    let target = match prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => RemoveTarget::Prefix { prefix, recursive },
        None if keys.is_empty() => {
            bail!("either provide file keys as arguments or use --prefix")
        }
        None => RemoveTarget::Keys(keys),
    };

    let engine = default_engine(connect(cfg)?);
    println!("Removing from bucket: {bucket}");
    if dry_run {
        println!("DRY RUN - no changes will be made");
    }
    println!();

    let opts = SyncOptions {
        dry_run,
        ..SyncOptions::default()
    };
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let report = with_progress(engine.remove(&target, &opts, Some(tx), cancel), rx, false)
        .await
        .context("remove failed")?;

    print_removal_summary(&report);
    Ok(report)
}
