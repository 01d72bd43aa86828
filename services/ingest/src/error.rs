//! Error types for the ingestion service

use common::error::DatabaseError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while inspecting or transforming a media file
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structurally malformed content, only surfaced in strict mode
    #[error("corrupt {format} file: {reason}")]
    Corrupt {
        format: &'static str,
        reason: String,
    },

    /// A required external tool is missing from the environment
    #[error("{0} is not available")]
    ToolUnavailable(&'static str),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: &'static str, message: String },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised by a source resolver while fetching a remote file
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("unsupported source url: {0}")]
    UnsupportedScheme(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("file exceeds the maximum size of {max} bytes")]
    TooLarge { max: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while persisting media bytes
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),
}

/// Errors raised by upload and media stores
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(DatabaseError::Query(err))
    }
}

/// Errors raised when handing an asset to the job system
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("job queue is closed")]
    QueueClosed,
}

/// Top-level error for ingesting an asset
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Content rejected by the ingestion policy
    #[error("{0}")]
    Rejected(String),

    /// The processing task panicked or was aborted
    #[error("processing task failed: {0}")]
    Task(String),

    #[error("upload has no files or sources")]
    EmptyUpload,
}

pub type IngestResult<T> = Result<T, IngestError>;
