use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod diff;
pub mod exclude;
pub mod path_utils;

pub use exclude::ExclusionRules;
pub use path_utils::{LogicalPath, NvPath};

/// Slack applied to modification-time comparisons, absorbing filesystem and
/// object-store clock granularity.
pub const MODIFIED_TOLERANCE_MS: i64 = 1_000;

/// Suffix of in-progress download files; never part of a snapshot.
pub const PARTIAL_SUFFIX: &str = ".nvsync-part";

/// Observable state of one file or object, from either side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectMetadata {
    pub path: LogicalPath,
    /// Exact object key or mount-relative file name this entry was read from.
    /// `path` is only its comparison form.
    pub address: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub content_tag: Option<String>,
}

/// Point-in-time mapping of logical path to metadata for one side of a run.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: BTreeMap<LogicalPath, ObjectMetadata>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory markers and empty paths never enter a snapshot.
    /// Returns false when the entry was refused.
    pub fn insert(&mut self, meta: ObjectMetadata) -> bool {
        if meta.path.is_empty() || meta.path.is_directory_marker() {
            return false;
        }
        self.entries.insert(meta.path.clone(), meta);
        true
    }

    pub fn get(&self, path: &str) -> Option<&ObjectMetadata> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectMetadata> {
        self.entries.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &LogicalPath> {
        self.entries.keys()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|m| m.size).sum()
    }
}

impl FromIterator<ObjectMetadata> for Snapshot {
    fn from_iter<I: IntoIterator<Item = ObjectMetadata>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for meta in iter {
            snapshot.insert(meta);
        }
        snapshot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferReason {
    NewFile,
    SizeDiffers,
    SourceIsNewer,
}

impl fmt::Display for TransferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferReason::NewFile => "new file",
            TransferReason::SizeDiffers => "size differs",
            TransferReason::SourceIsNewer => "source is newer",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationPlan {
    pub transfers: Vec<TransferAction>,
    pub skips: Vec<LogicalPath>,
    pub deletes: Vec<DeleteAction>,
}

impl ReconciliationPlan {
    pub fn empty() -> Self {
        Self {
            transfers: Vec::new(),
            skips: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Nothing to transfer and nothing to delete.
    pub fn is_noop(&self) -> bool {
        self.transfers.is_empty() && self.deletes.is_empty()
    }

    pub fn transfer_bytes(&self) -> u64 {
        self.transfers.iter().map(|t| t.size).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferAction {
    pub path: LogicalPath,
    /// Where to read from on the source side.
    pub source_address: String,
    /// Where to write on the target side: the existing entry's address, or `path`
    /// for a new one.
    pub target_address: String,
    pub size: u64,
    /// Source-side modification time, mirrored onto local files after a pull.
    pub modified_at: DateTime<Utc>,
    pub reason: TransferReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteAction {
    pub path: LogicalPath,
    pub address: String,
}

impl DeleteAction {
    /// Delete addressed by its comparison path, for keys that were never listed.
    pub fn at(path: LogicalPath) -> Self {
        let address = path.as_str().to_string();
        Self { path, address }
    }
}
