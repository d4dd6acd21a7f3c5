use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use nvsync_core::{NvPath, PARTIAL_SUFFIX};
use std::io;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::io_utils::robust_rename;
use crate::sync::ItemError;

fn validate_relative_path(path: &str) -> Result<(), ItemError> {
    if path.is_empty() {
        return Err(ItemError::UnsafePath("empty path".into()));
    }
    if !NvPath::verify_safe(path) || (path.len() > 1 && path.chars().nth(1) == Some(':')) {
        return Err(ItemError::UnsafePath(format!(
            "Security: path is absolute or traverses upwards: {path}"
        )));
    }
    Ok(())
}

/// The mount directory, as seen by the executor: every path it touches is resolved here.
#[derive(Debug, Clone)]
pub struct LocalTree {
    root: Utf8PathBuf,
}

impl LocalTree {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Map a mount-relative name to a filesystem path that is guaranteed to stay under
    /// the root.
    pub fn resolve(&self, rel: &str) -> Result<Utf8PathBuf, ItemError> {
        validate_relative_path(rel)?;
        let target = self.root.join(rel);
        if !target.starts_with(&self.root) {
            return Err(ItemError::UnsafePath(format!(
                "Security: path escapes root: {target}"
            )));
        }
        Ok(target)
    }

    /// `mkdir -p` the root. Parents of individual files are created on write.
    pub async fn ensure_root(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(self.root.as_std_path()).await
    }

    /// Open a file for upload, returning the handle and its current length.
    pub async fn open(&self, rel: &str) -> Result<(File, u64), ItemError> {
        let full = self.resolve(rel)?;
        let file = File::open(full.as_std_path()).await?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Start writing `rel` through a sibling partial file.
    pub async fn begin_write(&self, rel: &str) -> Result<PartialFile, ItemError> {
        let target = self.resolve(rel)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent.as_std_path()).await?;
        }
        let tmp = Utf8PathBuf::from(format!("{target}{PARTIAL_SUFFIX}"));
        let file = File::create(tmp.as_std_path()).await?;
        Ok(PartialFile {
            tmp,
            target,
            file: Some(file),
            written: 0,
            committed: false,
        })
    }

    /// Remove a file. Already gone counts as removed.
    pub async fn remove(&self, rel: &str) -> Result<(), ItemError> {
        let full = self.resolve(rel)?;
        match tokio::fs::remove_file(full.as_std_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} already absent", full);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// A download in progress. Dropped without `commit` (failure, size mismatch,
/// cancellation) the partial file is removed.
#[derive(Debug)]
pub struct PartialFile {
    tmp: Utf8PathBuf,
    target: Utf8PathBuf,
    file: Option<File>,
    written: u64,
    committed: bool,
}

impl PartialFile {
    pub async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("partial file already closed"))?;
        file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Move the partial file into place and mirror `modified_at` onto it. A failed
    /// timestamp update only warns: the content is already correct.
    pub async fn commit(mut self, modified_at: Option<DateTime<Utc>>) -> Result<(), ItemError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        robust_rename(self.tmp.as_std_path(), self.target.as_std_path()).await?;
        self.committed = true;

        if let Some(ts) = modified_at {
            let mtime = FileTime::from_unix_time(ts.timestamp(), ts.timestamp_subsec_nanos());
            if let Err(e) = filetime::set_file_mtime(self.target.as_std_path(), mtime) {
                warn!("Failed to set mtime on {}: {}", self.target, e);
            }
        }
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = std::fs::remove_file(self.tmp.as_std_path());
        }
    }
}
