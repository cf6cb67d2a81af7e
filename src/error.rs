//! Typed error taxonomy for the ingestion pipeline.
//!
//! Each component gets its own error enum so call sites can match on the
//! kind that matters to them; the Coordinator collapses all of them into
//! [`StageError`] when deciding which `failed` event to publish.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("io error writing blob: {0}")]
    Io(#[from] std::io::Error),
    #[error("object store request failed: {0}")]
    ObjectStore(String),
    #[error("blob not found at {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum FetcherError {
    #[error("request timed out")]
    Timeout,
    #[error("transient transport error: {0}")]
    Transient(String),
    #[error("resource not found (404)")]
    NotFound,
    #[error("blob store error: {0}")]
    Store(#[from] BlobStoreError),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("embedding provider request failed: {0}")]
    Request(String),
    #[error("embedding provider returned a vector of unexpected dimension: got {got}, want {want}")]
    BadDimension { got: usize, want: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("constraint violated: {0}")]
    Integrity(String),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus unavailable: {0}")]
    Unavailable(String),
}

/// The coarse-grained kind the Coordinator uses to decide which
/// `failed` event to publish and whether a stage is retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    TransientIo,
    NotFound,
    BadContent,
    ProviderError,
    Integrity,
    BusUnavailable,
}

#[derive(Debug, Error)]
#[error("{kind:?} in stage {stage}: {message}")]
pub struct StageError {
    pub kind: StageErrorKind,
    pub stage: &'static str,
    pub message: String,
}

impl StageError {
    pub fn new(kind: StageErrorKind, stage: &'static str, message: impl Into<String>) -> Self {
        Self { kind, stage, message: message.into() }
    }
}

impl From<FetcherError> for StageError {
    fn from(e: FetcherError) -> Self {
        let kind = match &e {
            FetcherError::Timeout | FetcherError::Transient(_) => StageErrorKind::TransientIo,
            FetcherError::NotFound => StageErrorKind::NotFound,
            FetcherError::Store(_) => StageErrorKind::TransientIo,
        };
        StageError::new(kind, "fetch", e.to_string())
    }
}

impl From<ProviderError> for StageError {
    fn from(e: ProviderError) -> Self {
        StageError::new(StageErrorKind::ProviderError, "embedding", e.to_string())
    }
}

impl From<StoreError> for StageError {
    fn from(e: StoreError) -> Self {
        let kind = match &e {
            StoreError::Integrity(_) => StageErrorKind::Integrity,
            StoreError::Database(_) => StageErrorKind::Integrity,
        };
        StageError::new(kind, "persist", e.to_string())
    }
}

impl From<BusError> for StageError {
    fn from(e: BusError) -> Self {
        StageError::new(StageErrorKind::BusUnavailable, "bus", e.to_string())
    }
}
