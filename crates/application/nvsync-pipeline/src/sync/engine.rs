use camino::Utf8PathBuf;
use nvsync_core::diff::diff;
use nvsync_core::{DeleteAction, ExclusionRules, LogicalPath, NvPath, ReconciliationPlan, Snapshot};
use nvsync_infra::{BucketInfo, ObjectInfo, ObjectStore};
use nvsync_scanner::{LocalScan, ScanDepth, Scanner, ScannerError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::sync::execute::{DefaultPlanExecutor, PlanExecutor};
use crate::sync::local::LocalTree;
use crate::sync::remote::{listing_prefix, remote_snapshot};
use crate::sync::{Direction, RunReport, RunStatus, SyncError, SyncEvent, SyncOptions, SyncRequest};

/// What `rm` deletes from the bucket.
#[derive(Debug, Clone)]
pub enum RemoveTarget {
    Keys(Vec<String>),
    Prefix { prefix: String, recursive: bool },
}

/// Source and target of one run, ready for diffing.
struct Sides {
    source: Snapshot,
    target: Snapshot,
    exclusions: ExclusionRules,
}

pub struct DefaultSyncEngine {
    store: Arc<dyn ObjectStore>,
    executor: Box<dyn PlanExecutor>,
}

impl DefaultSyncEngine {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let executor = Box::new(DefaultPlanExecutor::new(store.clone()));
        Self { store, executor }
    }

    /// Disk only. Runs the blocking walk off the runtime and bridges the token into the
    /// scanner's flag.
    async fn scan_local(
        &self,
        req: &SyncRequest,
        cancel: &CancellationToken,
    ) -> Result<LocalScan, SyncError> {
        let flag = Arc::new(AtomicBool::new(cancel.is_cancelled()));
        let watcher = {
            let flag = flag.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                flag.store(true, Ordering::Relaxed);
            })
        };

        let mount = req.mount_root.clone();
        let prefix = req.options.prefix.clone();
        let res = tokio::task::spawn_blocking(move || {
            Scanner::scan_local(&mount, &prefix, ScanDepth::Recursive, Some(flag))
        })
        .await;
        watcher.abort();

        match res {
            Ok(Ok(scan)) => Ok(scan),
            Ok(Err(ScannerError::Cancelled)) => Err(SyncError::Cancelled),
            Ok(Err(e)) => Err(SyncError::Enumeration(format!(
                "scan {} failed: {e}",
                req.mount_root
            ))),
            Err(e) => Err(SyncError::Local(format!("scan task failed: {e}"))),
        }
    }

    /// Enumerate both sides. `None` means there is nothing to do: a push whose local
    /// root is absent and no delete-sweep was requested.
    async fn sides(
        &self,
        req: &SyncRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<Sides>, SyncError> {
        let opts = &req.options;
        let sides = match req.direction {
            Direction::Push => {
                let local = self.scan_local(req, cancel).await?;
                if local.is_absent() && !opts.delete_stale {
                    info!(
                        "Local path for prefix '{}' does not exist, nothing to push",
                        opts.prefix
                    );
                    return Ok(None);
                }
                let remote = remote_snapshot(&*self.store, &opts.prefix, ScanDepth::Recursive)
                    .await?;
                Sides {
                    source: local.into_snapshot(),
                    target: remote,
                    exclusions: ExclusionRules::new(&opts.exclude),
                }
            }
            Direction::Pull => {
                let remote = remote_snapshot(&*self.store, &opts.prefix, ScanDepth::Recursive)
                    .await?;
                let local = self.scan_local(req, cancel).await?;
                Sides {
                    source: remote,
                    target: local.into_snapshot(),
                    // Pull accepts everything the bucket offers.
                    exclusions: ExclusionRules::none(),
                }
            }
        };

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(Some(sides))
    }

    fn compute_plan(sides: &Sides, opts: &SyncOptions) -> ReconciliationPlan {
        let plan = diff(
            &sides.source,
            &sides.target,
            &sides.exclusions,
            opts.delete_stale,
        );
        info!(
            "Plan: {} to transfer ({} bytes), {} to skip, {} to delete",
            plan.transfers.len(),
            plan.transfer_bytes(),
            plan.skips.len(),
            plan.deletes.len()
        );
        plan
    }

    /// Pure planning step: enumerate both sides and diff them.
    pub async fn plan(&self, req: &SyncRequest) -> Result<ReconciliationPlan, SyncError> {
        let cancel = CancellationToken::new();
        Ok(match self.sides(req, &cancel).await? {
            Some(sides) => Self::compute_plan(&sides, &req.options),
            None => ReconciliationPlan::empty(),
        })
    }

    /// Enumerate, filter, diff, execute. Per-item failures end up in the report,
    /// only run-level failures are returned as errors.
    pub async fn reconcile(
        &self,
        req: &SyncRequest,
        events: Option<Sender<SyncEvent>>,
        cancel: CancellationToken,
    ) -> Result<RunReport, SyncError> {
        let opts = &req.options;
        info!(
            "Starting {} of '{}' against {}{}",
            req.direction,
            opts.prefix,
            req.mount_root,
            if opts.dry_run { " (dry run)" } else { "" }
        );

        let Some(sides) = self.sides(req, &cancel).await? else {
            return Ok(RunReport::empty(req.direction, opts.dry_run));
        };
        let plan = Self::compute_plan(&sides, opts);
        drop(sides);

        let local = LocalTree::new(req.mount_root.clone());
        if req.direction == Direction::Pull && !opts.dry_run {
            local
                .ensure_root()
                .await
                .map_err(|e| SyncError::Local(format!("create {} failed: {e}", req.mount_root)))?;
        }

        let outcome = self
            .executor
            .apply(req.direction, &plan, &local, opts, events, cancel)
            .await;

        Ok(RunReport {
            direction: req.direction,
            dry_run: opts.dry_run,
            status: status_of(outcome.cancelled, outcome.stats.failed),
            stats: outcome.stats,
        })
    }

    /// Objects under `prefix`. Flat listings include directory markers for sub-prefixes.
    pub async fn list(
        &self,
        prefix: &str,
        depth: ScanDepth,
    ) -> Result<Vec<ObjectInfo>, SyncError> {
        let listing = listing_prefix(prefix, depth);
        let objects = self
            .store
            .list_objects(&listing, depth == ScanDepth::Recursive)
            .await
            .map_err(|e| SyncError::Enumeration(format!("list '{listing}' failed: {e}")))?;
        Ok(objects
            .into_iter()
            .filter(|o| NvPath::within_prefix(&o.key, prefix))
            .collect())
    }

    pub async fn buckets(&self) -> Result<Vec<BucketInfo>, SyncError> {
        self.store
            .list_buckets()
            .await
            .map_err(|e| SyncError::Enumeration(format!("list buckets failed: {e}")))
    }

    /// Delete keys from the bucket through the executor, so dry-run, concurrency,
    /// events and partial-failure accounting match a push delete-sweep.
    pub async fn remove(
        &self,
        target: &RemoveTarget,
        opts: &SyncOptions,
        events: Option<Sender<SyncEvent>>,
        cancel: CancellationToken,
    ) -> Result<RunReport, SyncError> {
        let deletes: Vec<DeleteAction> = match target {
            RemoveTarget::Keys(keys) => keys
                .iter()
                .map(|k| LogicalPath::new(k))
                .filter(|p| !p.is_empty())
                .map(DeleteAction::at)
                .collect(),
            RemoveTarget::Prefix { prefix, recursive } => {
                let depth = if *recursive {
                    ScanDepth::Recursive
                } else {
                    ScanDepth::Flat
                };
                self.list(prefix, depth)
                    .await?
                    .into_iter()
                    // Synthesized common prefixes carry no timestamp and are not objects.
                    .filter(|o| !(o.is_directory_marker() && o.last_modified.is_none()))
                    .map(|o| DeleteAction {
                        path: LogicalPath::from_key(&o.key),
                        address: o.key,
                    })
                    .collect()
            }
        };

        info!("Removing {} object(s)", deletes.len());
        let plan = ReconciliationPlan {
            transfers: Vec::new(),
            skips: Vec::new(),
            deletes,
        };
        // Remote-only plan; the local tree is never touched.
        let local = LocalTree::new(Utf8PathBuf::new());
        let outcome = self
            .executor
            .apply(Direction::Push, &plan, &local, opts, events, cancel)
            .await;

        Ok(RunReport {
            direction: Direction::Push,
            dry_run: opts.dry_run,
            status: status_of(outcome.cancelled, outcome.stats.failed),
            stats: outcome.stats,
        })
    }
}

fn status_of(cancelled: bool, failed: u64) -> RunStatus {
    if cancelled {
        RunStatus::Cancelled
    } else if failed > 0 {
        RunStatus::PartialFailure
    } else {
        RunStatus::Success
    }
}
