//! Local-disk staging for the upload fallback path.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};

pub const FILE_WAIT_INTERVAL: Duration = Duration::from_millis(200);
pub const FILE_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
#[error("staged file {} did not appear within {timeout:?}", .path.display())]
pub struct FileWaitTimeoutError {
    pub path: PathBuf,
    pub timeout: Duration,
}

/// Wait until `path` exists, checking every `interval`.
pub async fn wait_for_file(
    path: &Path,
    interval: Duration,
    timeout: Duration,
) -> Result<(), FileWaitTimeoutError> {
    let deadline = Instant::now() + timeout;
    loop {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(FileWaitTimeoutError {
                path: path.to_path_buf(),
                timeout,
            });
        }
        sleep(interval).await;
    }
}

/// Result of removing a staged file. Failure never fails the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleanup {
    Removed,
    Degraded { reason: String },
}

pub async fn remove_staged(path: &Path) -> Cleanup {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Cleanup::Removed,
        // Nothing was ever written
        Err(e) if e.kind() == ErrorKind::NotFound => Cleanup::Removed,
        Err(e) => Cleanup::Degraded {
            reason: format!("failed to remove {}: {}", path.display(), e),
        },
    }
}
