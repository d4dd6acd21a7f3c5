mod io_utils;
pub mod sync;
pub mod tracker;

// Re-export core engine components
pub use sync::{
    default_engine, DefaultSyncEngine, Direction, ItemError, ItemOutcome, PlannedAction,
    RemoveTarget, RunReport, RunStatistics, RunStatus, SyncError, SyncEvent, SyncOptions,
    SyncRequest,
};
pub use tracker::{ProgressTracker, TransferSnapshot};

// Re-export types often needed by consumers
pub use nvsync_core::{ReconciliationPlan, TransferReason};
pub use nvsync_scanner::ScanDepth;
