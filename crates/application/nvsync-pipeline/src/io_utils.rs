use std::io;
use std::path::Path;
use std::time::Duration;

const RENAME_ATTEMPTS: u32 = 5;
const FIRST_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Rename with a few retries. A just-closed file may stay locked by antivirus or
/// indexers for a moment on Windows. A missing source is never retried.
pub async fn robust_rename(from: &Path, to: &Path) -> io::Result<()> {
    let mut backoff = FIRST_BACKOFF;
    for attempt in 1..=RENAME_ATTEMPTS {
        match tokio::fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound || attempt == RENAME_ATTEMPTS => {
                return Err(e)
            }
            Err(_) => {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
    Err(io::Error::other("rename retries exhausted"))
}
