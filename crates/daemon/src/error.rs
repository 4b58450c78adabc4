use thiserror::Error;

use crate::generation::poll::PollExhausted;
use crate::generation::staging::FileWaitTimeoutError;
use crate::storage::StorageError;

/// Failure of the generation pipeline. The message is passed through to
/// the client as-is.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0}")]
    Provider(String),

    #[error("no video produced")]
    NoVideo,

    #[error(transparent)]
    PollExhausted(#[from] PollExhausted),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Failure to move the generated video into blob storage.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("stream from provider failed: {0}")]
    Stream(String),

    #[error("provider download failed: {0}")]
    Download(String),

    #[error(transparent)]
    FileWaitTimeout(#[from] FileWaitTimeoutError),

    #[error("staged file unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Streaming failed and the single disk-staging attempt failed too.
    #[error("streaming upload failed ({streaming}); disk fallback failed: {disk}")]
    Fallback {
        streaming: Box<UploadError>,
        disk: Box<UploadError>,
    },
}
