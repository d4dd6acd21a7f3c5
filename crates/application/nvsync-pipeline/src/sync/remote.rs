use chrono::{DateTime, Utc};
use nvsync_core::{LogicalPath, NvPath, ObjectMetadata, Snapshot};
use nvsync_infra::{ObjectInfo, ObjectStore};
use nvsync_scanner::ScanDepth;
use tracing::{debug, info};

use crate::sync::SyncError;

/// Key prefix as sent to the store. Recursive listings use the bare prefix so an object
/// named exactly like the prefix is found (siblings such as `models-old/` are filtered
/// afterwards); flat listings need the directory form for the delimiter to group children.
pub fn listing_prefix(prefix: &str, depth: ScanDepth) -> String {
    let normalized = NvPath::normalize(prefix);
    let trimmed = normalized.trim_end_matches('/');
    match depth {
        _ if trimmed.is_empty() => String::new(),
        ScanDepth::Recursive => trimmed.to_string(),
        ScanDepth::Flat => format!("{trimmed}/"),
    }
}

fn to_metadata(info: ObjectInfo) -> ObjectMetadata {
    ObjectMetadata {
        path: LogicalPath::from_key(&info.key),
        address: info.key,
        size: info.size,
        modified_at: info.last_modified.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        content_tag: info.etag,
    }
}

/// Enumerate the remote side under `prefix` into a snapshot. Directory markers and
/// keys outside the prefix namespace are dropped.
pub async fn remote_snapshot(
    store: &dyn ObjectStore,
    prefix: &str,
    depth: ScanDepth,
) -> Result<Snapshot, SyncError> {
    let listing = listing_prefix(prefix, depth);
    let objects = store
        .list_objects(&listing, depth == ScanDepth::Recursive)
        .await
        .map_err(|e| SyncError::Enumeration(format!("list '{listing}' failed: {e}")))?;

    let mut snapshot = Snapshot::new();
    let mut dropped = 0usize;
    for info in objects {
        if info.is_directory_marker() {
            dropped += 1;
            continue;
        }
        let meta = to_metadata(info);
        if !NvPath::within_prefix(meta.path.as_str(), prefix) || !snapshot.insert(meta) {
            dropped += 1;
        }
    }

    debug!("Dropped {} markers or out-of-prefix keys", dropped);
    info!(
        "Remote snapshot: {} objects ({} bytes) under '{}'",
        snapshot.len(),
        snapshot.total_bytes(),
        listing
    );
    Ok(snapshot)
}
