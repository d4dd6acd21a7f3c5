use camino::Utf8PathBuf;
use nvsync_core::{LogicalPath, TransferReason};
use nvsync_infra::StoreError;
use serde::Serialize;
use std::fmt;
use std::io;

pub mod engine;
pub mod execute;
pub mod local;
pub mod remote;

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Local tree is the source, the bucket the target.
    Push,
    /// Bucket is the source, the local tree the target.
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Push => "push",
            Direction::Pull => "pull",
        })
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Key prefix shared by both sides; also the local subdirectory under the mount.
    pub prefix: String,
    pub dry_run: bool,
    pub delete_stale: bool,
    /// Only honored on push.
    pub exclude: Vec<String>,
    pub max_concurrency: usize,
    pub rate_limit_bytes: Option<u64>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            dry_run: false,
            delete_stale: false,
            exclude: Vec::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            rate_limit_bytes: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub direction: Direction,
    pub mount_root: Utf8PathBuf,
    pub options: SyncOptions,
}

/// Final tally of one run. In a dry run `transferred` and `deleted` stay zero and the
/// `would_*` counters carry the planned work instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub transferred: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub failed: u64,
    pub would_transfer: u64,
    pub would_delete: u64,
    pub bytes_transferred: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Every item was attempted, at least one failed.
    PartialFailure,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub direction: Direction,
    pub dry_run: bool,
    pub stats: RunStatistics,
    pub status: RunStatus,
}

impl RunReport {
    pub fn empty(direction: Direction, dry_run: bool) -> Self {
        Self {
            direction,
            dry_run,
            stats: RunStatistics::default(),
            status: RunStatus::Success,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum PlannedAction {
    Upload(TransferReason),
    Download(TransferReason),
    DeleteRemote,
    DeleteLocal,
}

impl PlannedAction {
    pub fn is_delete(&self) -> bool {
        matches!(self, PlannedAction::DeleteRemote | PlannedAction::DeleteLocal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded,
    /// Dry run: the action was planned but not applied.
    WouldApply,
    Failed(String),
    /// In flight when the run was cancelled; not counted as a failure.
    Cancelled,
}

/// Per-item notifications streamed to the caller while a plan is applied.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Started {
        path: LogicalPath,
        action: PlannedAction,
        total_bytes: u64,
    },
    Progress {
        path: LogicalPath,
        bytes_delta: u64,
    },
    Finished {
        path: LogicalPath,
        action: PlannedAction,
        outcome: ItemOutcome,
    },
}

/// Run-level failure. No partial plan is applied when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Enumeration error: {0}")]
    Enumeration(String),
    #[error("Local state error: {0}")]
    Local(String),
    #[error("Run cancelled")]
    Cancelled,
}

/// Failure of a single transfer or delete. Counted, reported, never fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("unsafe path: {0}")]
    UnsafePath(String),
    #[error("cancelled")]
    Cancelled,
}

pub use engine::{DefaultSyncEngine, RemoveTarget};
pub use execute::{DefaultPlanExecutor, ExecutionOutcome, PlanExecutor};
pub use local::LocalTree;

/// Convenience constructor for the default engine.
pub fn default_engine(store: std::sync::Arc<dyn nvsync_infra::ObjectStore>) -> DefaultSyncEngine {
    DefaultSyncEngine::new(store)
}
