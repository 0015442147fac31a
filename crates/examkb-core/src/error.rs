use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Embedding provider '{provider}' failed on chunk {chunk}: {message}")]
    EmbeddingProvider { provider: String, chunk: usize, message: String },

    #[error("Embedding response misaligned on chunk {chunk}: expected {expected} vectors, missing slots {missing:?}")]
    EmbeddingAlignment { chunk: usize, expected: usize, missing: Vec<usize> },

    #[error("Row {row} rejected: {reason}")]
    RowValidation { row: usize, reason: String },

    #[error("Rerank failed: {0}")]
    Rerank(String),

    #[error("Reranker model is not ready yet")]
    RerankerNotReady,

    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown source schema: {0}")]
    UnknownSchema(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, serialisable discriminant of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmbeddingProvider,
    EmbeddingAlignment,
    RowValidation,
    Rerank,
    RerankerNotReady,
    IndexUnavailable,
    InvalidConfig,
    UnknownSchema,
    InvalidRequest,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmbeddingProvider { .. } => ErrorKind::EmbeddingProvider,
            Error::EmbeddingAlignment { .. } => ErrorKind::EmbeddingAlignment,
            Error::RowValidation { .. } => ErrorKind::RowValidation,
            Error::Rerank(_) => ErrorKind::Rerank,
            Error::RerankerNotReady => ErrorKind::RerankerNotReady,
            Error::IndexUnavailable(_) => ErrorKind::IndexUnavailable,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::UnknownSchema(_) => ErrorKind::UnknownSchema,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Error as returned to a caller: kind plus readable message.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody { kind: self.kind(), message: self.to_string() }
    }

    pub fn index<E: std::fmt::Display>(err: E) -> Self {
        Error::IndexUnavailable(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, Error>;
