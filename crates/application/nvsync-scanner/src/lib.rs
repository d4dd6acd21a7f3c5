use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use nvsync_core::{LogicalPath, NvPath, ObjectMetadata, Snapshot, PARTIAL_SUFFIX};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Scan cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDepth {
    /// Whole subtree.
    Recursive,
    /// Direct children of the root only.
    Flat,
}

/// Outcome of a local enumeration. `Absent` is distinct from an existing but empty
/// tree so callers can still run a delete-sweep against the other side.
#[derive(Debug, Clone)]
pub enum LocalScan {
    Absent,
    Present(Snapshot),
}

impl LocalScan {
    pub fn is_absent(&self) -> bool {
        matches!(self, LocalScan::Absent)
    }

    pub fn into_snapshot(self) -> Snapshot {
        match self {
            LocalScan::Absent => Snapshot::new(),
            LocalScan::Present(s) => s,
        }
    }
}

pub struct Scanner;

impl Scanner {
    pub fn modified_at(meta: &fs::Metadata) -> DateTime<Utc> {
        meta.modified()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Enumerate `mount/<prefix>` into a snapshot keyed by paths relative to `mount`.
    pub fn scan_local(
        mount: &Utf8Path,
        prefix: &str,
        depth: ScanDepth,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<LocalScan, ScannerError> {
        let prefix = NvPath::normalize(prefix);
        let prefix = prefix.trim_end_matches('/');
        let walk_root = if prefix.is_empty() {
            mount.to_owned()
        } else {
            mount.join(prefix)
        };

        match fs::metadata(&walk_root) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Local path {} does not exist", walk_root);
                return Ok(LocalScan::Absent);
            }
            Err(e) => return Err(e.into()),
        }

        info!("Scanning {} ({:?})", walk_root, depth);
        let canonical_mount = fs::canonicalize(mount)?;

        let mut walker = WalkDir::new(&walk_root).follow_links(false);
        if depth == ScanDepth::Flat {
            walker = walker.max_depth(1);
        }

        let mut candidates: Vec<Utf8PathBuf> = Vec::new();
        for entry in walker {
            if is_cancelled(&cancel) {
                return Err(ScannerError::Cancelled);
            }
            let entry = entry?;
            let ft = entry.file_type();
            if ft.is_dir() {
                continue;
            }
            if ft.is_symlink() {
                if !Self::symlink_stays_inside(entry.path(), &canonical_mount) {
                    debug!(
                        "Skipping symlink {} (escapes root or not a file)",
                        entry.path().display()
                    );
                    continue;
                }
            } else if !ft.is_file() {
                continue;
            }

            match Utf8PathBuf::from_path_buf(entry.into_path()) {
                Ok(p) if p.as_str().ends_with(PARTIAL_SUFFIX) => {
                    debug!("Skipping partial download {}", p);
                }
                Ok(p) => candidates.push(p),
                Err(p) => warn!("Skipping non-UTF-8 path {}", p.display()),
            }
        }

        let stat_results: Result<Vec<Option<ObjectMetadata>>, ScannerError> = candidates
            .par_iter()
            .map(|fs_path| {
                if is_cancelled(&cancel) {
                    return Err(ScannerError::Cancelled);
                }
                let meta = match fs::metadata(fs_path) {
                    Ok(m) => m,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!("{} vanished during scan", fs_path);
                        return Ok(None);
                    }
                    Err(e) => return Err(e.into()),
                };
                let rel = fs_path.strip_prefix(mount).map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("{fs_path} is outside {mount}"),
                    )
                })?;

                // Split on the host separator only: `a\b.txt` is one name on Unix.
                let segments: Vec<&str> = rel.components().map(|c| c.as_str()).collect();

                Ok(Some(ObjectMetadata {
                    path: LogicalPath::from_key(&segments.join("/")),
                    address: rel.as_str().to_string(),
                    size: meta.len(),
                    modified_at: Self::modified_at(&meta),
                    content_tag: None,
                }))
            })
            .collect();

        let snapshot: Snapshot = stat_results?.into_iter().flatten().collect();
        info!(
            "Scanned {} files ({} bytes) under {}",
            snapshot.len(),
            snapshot.total_bytes(),
            walk_root
        );

        Ok(LocalScan::Present(snapshot))
    }

    fn symlink_stays_inside(link: &Path, canonical_root: &Path) -> bool {
        match fs::canonicalize(link) {
            Ok(target) => target.starts_with(canonical_root) && target.is_file(),
            Err(_) => false,
        }
    }
}

fn is_cancelled(cancel: &Option<Arc<AtomicBool>>) -> bool {
    cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
}
