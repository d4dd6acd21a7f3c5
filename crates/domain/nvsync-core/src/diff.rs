use crate::exclude::ExclusionRules;
use crate::{
    DeleteAction, LogicalPath, ObjectMetadata, ReconciliationPlan, Snapshot, TransferAction,
    TransferReason, MODIFIED_TOLERANCE_MS,
};
use chrono::TimeDelta;
use std::collections::HashSet;

/// Compare a source snapshot (the side being mirrored) against a target snapshot.
///
/// Exclusions only filter the source. With `delete_stale`, every target path that is not
/// in the considered source set is scheduled for deletion, so an excluded source path
/// removes its target counterpart.
pub fn diff(
    source: &Snapshot,
    target: &Snapshot,
    exclusions: &ExclusionRules,
    delete_stale: bool,
) -> ReconciliationPlan {
    let mut transfers = Vec::new();
    let mut skips = Vec::new();
    let mut deletes = Vec::new();

    let mut considered: HashSet<&LogicalPath> = HashSet::new();

    for src in source.iter() {
        if exclusions.is_excluded(src.path.as_str()) {
            continue;
        }
        considered.insert(&src.path);

        let existing = target.get(src.path.as_str());
        match transfer_reason(src, existing) {
            Some(reason) => transfers.push(TransferAction {
                path: src.path.clone(),
                source_address: src.address.clone(),
                target_address: existing
                    .map_or_else(|| src.path.as_str().to_string(), |t| t.address.clone()),
                size: src.size,
                modified_at: src.modified_at,
                reason,
            }),
            None => skips.push(src.path.clone()),
        }
    }

    if delete_stale {
        for tgt in target.iter() {
            if !considered.contains(&tgt.path) {
                deletes.push(DeleteAction {
                    path: tgt.path.clone(),
                    address: tgt.address.clone(),
                });
            }
        }
    }

    ReconciliationPlan {
        transfers,
        skips,
        deletes,
    }
}

/// Why `source` has to be transferred over `target`, if at all.
/// Only the "source is newer" direction is tested.
pub fn transfer_reason(
    source: &ObjectMetadata,
    target: Option<&ObjectMetadata>,
) -> Option<TransferReason> {
    let target = match target {
        Some(t) => t,
        None => return Some(TransferReason::NewFile),
    };

    if source.size != target.size {
        return Some(TransferReason::SizeDiffers);
    }

    let tolerance = TimeDelta::milliseconds(MODIFIED_TOLERANCE_MS);
    if source.modified_at.signed_duration_since(target.modified_at) > tolerance {
        return Some(TransferReason::SourceIsNewer);
    }

    None
}
