use bytes::Bytes;
use futures::stream::{self, StreamExt};
use nvsync_core::{DeleteAction, LogicalPath, ReconciliationPlan, TransferAction};
use nvsync_infra::{ObjectStore, Throttle};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::Sender;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sync::local::LocalTree;
use crate::sync::{
    Direction, ItemError, ItemOutcome, PlannedAction, RunStatistics, SyncEvent, SyncOptions,
};

const UPLOAD_CHUNK: usize = 64 * 1024;
const PROGRESS_BYTES: u64 = 1_000_000;
const PROGRESS_INTERVAL_MS: u128 = 100;

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub stats: RunStatistics,
    /// The token fired before every item finished.
    pub cancelled: bool,
}

#[async_trait::async_trait]
pub trait PlanExecutor: Send + Sync {
    /// Apply `plan` against the target side of `direction`. Per-item failures are
    /// counted, never returned.
    async fn apply(
        &self,
        direction: Direction,
        plan: &ReconciliationPlan,
        local: &LocalTree,
        opts: &SyncOptions,
        events: Option<Sender<SyncEvent>>,
        cancel: CancellationToken,
    ) -> ExecutionOutcome;
}

#[derive(Debug, Default)]
struct RunCounters {
    transferred: AtomicU64,
    skipped: AtomicU64,
    deleted: AtomicU64,
    failed: AtomicU64,
    would_transfer: AtomicU64,
    would_delete: AtomicU64,
    bytes_transferred: AtomicU64,
}

impl RunCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn finish(&self) -> RunStatistics {
        RunStatistics {
            transferred: self.transferred.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            would_transfer: self.would_transfer.load(Ordering::Relaxed),
            would_delete: self.would_delete.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy)]
enum Item<'p> {
    Transfer(&'p TransferAction),
    Delete(&'p DeleteAction),
}

impl Item<'_> {
    fn path(&self) -> &LogicalPath {
        match self {
            Item::Transfer(t) => &t.path,
            Item::Delete(d) => &d.path,
        }
    }

    fn action(&self, direction: Direction) -> PlannedAction {
        match (self, direction) {
            (Item::Transfer(t), Direction::Push) => PlannedAction::Upload(t.reason),
            (Item::Transfer(t), Direction::Pull) => PlannedAction::Download(t.reason),
            (Item::Delete(_), Direction::Push) => PlannedAction::DeleteRemote,
            (Item::Delete(_), Direction::Pull) => PlannedAction::DeleteLocal,
        }
    }

    fn bytes(&self) -> u64 {
        match self {
            Item::Transfer(t) => t.size,
            Item::Delete(_) => 0,
        }
    }
}

async fn emit(tx: &Option<Sender<SyncEvent>>, event: SyncEvent) {
    if let Some(t) = tx {
        let _ = t.send(event).await;
    }
}

/// Emits coalesced `Progress` events: at most one per megabyte or per 100 ms.
struct ProgressEmitter<'a> {
    tx: &'a Option<Sender<SyncEvent>>,
    path: &'a LogicalPath,
    accumulated: u64,
    last_emit: Instant,
}

impl<'a> ProgressEmitter<'a> {
    fn new(tx: &'a Option<Sender<SyncEvent>>, path: &'a LogicalPath) -> Self {
        Self {
            tx,
            path,
            accumulated: 0,
            last_emit: Instant::now(),
        }
    }

    async fn add(&mut self, bytes: u64) {
        self.accumulated += bytes;
        if self.accumulated > PROGRESS_BYTES
            || self.last_emit.elapsed().as_millis() > PROGRESS_INTERVAL_MS
        {
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        if self.accumulated > 0 {
            emit(
                self.tx,
                SyncEvent::Progress {
                    path: self.path.clone(),
                    bytes_delta: self.accumulated,
                },
            )
            .await;
            self.accumulated = 0;
            self.last_emit = Instant::now();
        }
    }
}

pub struct DefaultPlanExecutor {
    store: Arc<dyn ObjectStore>,
}

impl DefaultPlanExecutor {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_item(
        &self,
        item: Item<'_>,
        direction: Direction,
        local: &LocalTree,
        throttle: Option<&Throttle>,
        events: &Option<Sender<SyncEvent>>,
        cancel: &CancellationToken,
        counters: &RunCounters,
    ) {
        // Items not yet started when the token fires are left alone.
        if cancel.is_cancelled() {
            return;
        }
        let path = item.path();
        let action = item.action(direction);

        emit(
            events,
            SyncEvent::Started {
                path: path.clone(),
                action,
                total_bytes: item.bytes(),
            },
        )
        .await;

        let work = async {
            match (item, direction) {
                (Item::Transfer(t), Direction::Push) => {
                    self.upload(t, local, throttle, events).await
                }
                (Item::Transfer(t), Direction::Pull) => {
                    self.download(t, local, throttle, events).await
                }
                (Item::Delete(d), Direction::Push) => {
                    self.store.delete_object(&d.address).await?;
                    Ok(0)
                }
                (Item::Delete(d), Direction::Pull) => {
                    local.remove(&d.address).await?;
                    Ok(0)
                }
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ItemError::Cancelled),
            r = work => r,
        };

        let outcome = match result {
            Ok(bytes) => {
                if action.is_delete() {
                    RunCounters::bump(&counters.deleted, 1);
                } else {
                    RunCounters::bump(&counters.transferred, 1);
                    RunCounters::bump(&counters.bytes_transferred, bytes);
                }
                debug!("{:?} {} done", action, path);
                ItemOutcome::Succeeded
            }
            Err(ItemError::Cancelled) => {
                debug!("{:?} {} aborted by cancellation", action, path);
                ItemOutcome::Cancelled
            }
            Err(e) => {
                warn!("{:?} {} failed: {}", action, path, e);
                RunCounters::bump(&counters.failed, 1);
                ItemOutcome::Failed(e.to_string())
            }
        };

        emit(
            events,
            SyncEvent::Finished {
                path: path.clone(),
                action,
                outcome,
            },
        )
        .await;
    }

    async fn upload(
        &self,
        t: &TransferAction,
        local: &LocalTree,
        throttle: Option<&Throttle>,
        events: &Option<Sender<SyncEvent>>,
    ) -> Result<u64, ItemError> {
        let (file, len) = local.open(&t.source_address).await?;
        if len != t.size {
            // Changed since the snapshot; the planned decision no longer holds.
            return Err(ItemError::SizeMismatch {
                expected: t.size,
                actual: len,
            });
        }

        let sent = Arc::new(AtomicU64::new(0));
        let body = {
            let sent = sent.clone();
            let throttle = throttle.cloned();
            let tx = events.clone();
            let path = t.path.clone();
            ReaderStream::with_capacity(file, UPLOAD_CHUNK)
                .then(move |chunk: io::Result<Bytes>| {
                    let sent = sent.clone();
                    let throttle = throttle.clone();
                    let tx = tx.clone();
                    let path = path.clone();
                    async move {
                        if let Ok(c) = &chunk {
                            if let Some(th) = &throttle {
                                th.acquire(c.len()).await;
                            }
                            sent.fetch_add(c.len() as u64, Ordering::Relaxed);
                            if let Some(tx) = &tx {
                                // Upload progress is best-effort; never stall the body on it.
                                let _ = tx.try_send(SyncEvent::Progress {
                                    path,
                                    bytes_delta: c.len() as u64,
                                });
                            }
                        }
                        chunk
                    }
                })
                .boxed()
        };

        self.store.put_object(&t.target_address, body, t.size).await?;

        let actual = sent.load(Ordering::Relaxed);
        if actual != t.size {
            return Err(ItemError::SizeMismatch {
                expected: t.size,
                actual,
            });
        }
        Ok(actual)
    }

    async fn download(
        &self,
        t: &TransferAction,
        local: &LocalTree,
        throttle: Option<&Throttle>,
        events: &Option<Sender<SyncEvent>>,
    ) -> Result<u64, ItemError> {
        let object = self.store.get_object(&t.source_address).await?;
        let mut partial = local.begin_write(&t.target_address).await?;
        let mut body = object.body;
        let mut progress = ProgressEmitter::new(events, &t.path);

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if let Some(th) = throttle {
                th.acquire(chunk.len()).await;
            }
            partial.write(&chunk).await?;
            progress.add(chunk.len() as u64).await;
        }
        progress.flush().await;

        // Dropping `partial` on these paths removes the incomplete file.
        let written = partial.written();
        if written != t.size {
            return Err(ItemError::SizeMismatch {
                expected: t.size,
                actual: written,
            });
        }
        partial.commit(Some(t.modified_at)).await?;
        Ok(written)
    }
}

#[async_trait::async_trait]
impl PlanExecutor for DefaultPlanExecutor {
    async fn apply(
        &self,
        direction: Direction,
        plan: &ReconciliationPlan,
        local: &LocalTree,
        opts: &SyncOptions,
        events: Option<Sender<SyncEvent>>,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        let counters = RunCounters::default();
        RunCounters::bump(&counters.skipped, plan.skips.len() as u64);

        let items: Vec<Item<'_>> = plan
            .transfers
            .iter()
            .map(Item::Transfer)
            .chain(plan.deletes.iter().map(Item::Delete))
            .collect();

        if opts.dry_run {
            info!(
                "Dry run ({}): {} transfers, {} deletes, {} skipped",
                direction,
                plan.transfers.len(),
                plan.deletes.len(),
                plan.skips.len()
            );
            for item in items {
                let action = item.action(direction);
                if action.is_delete() {
                    RunCounters::bump(&counters.would_delete, 1);
                } else {
                    RunCounters::bump(&counters.would_transfer, 1);
                }
                emit(
                    &events,
                    SyncEvent::Finished {
                        path: item.path().clone(),
                        action,
                        outcome: ItemOutcome::WouldApply,
                    },
                )
                .await;
            }
            return ExecutionOutcome {
                stats: counters.finish(),
                cancelled: false,
            };
        }

        info!(
            "Applying {} plan: {} transfers ({} bytes), {} deletes",
            direction,
            plan.transfers.len(),
            plan.transfer_bytes(),
            plan.deletes.len()
        );

        let throttle = opts.rate_limit_bytes.and_then(Throttle::per_second);
        let concurrency = opts.max_concurrency.max(1);

        // Futures are built before buffering; mapping `Item<'_>` inside the stream
        // does not satisfy the async trait's `Send` bound.
        let runs: Vec<_> = items
            .into_iter()
            .map(|item| {
                self.run_item(
                    item,
                    direction,
                    local,
                    throttle.as_ref(),
                    &events,
                    &cancel,
                    &counters,
                )
            })
            .collect();

        stream::iter(runs)
            .buffer_unordered(concurrency)
            .collect::<Vec<()>>()
            .await;

        let stats = counters.finish();
        let cancelled = cancel.is_cancelled();
        info!(
            "{} finished: {} transferred, {} deleted, {} failed{}",
            direction,
            stats.transferred,
            stats.deleted,
            stats.failed,
            if cancelled { " (cancelled)" } else { "" }
        );

        ExecutionOutcome { stats, cancelled }
    }
}
