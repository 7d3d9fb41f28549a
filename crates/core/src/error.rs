use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("{subject} mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        subject: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document already exists: {0}")]
    AlreadyExists(String),

    #[error("document produced no chunks: {0}")]
    EmptyDocument(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk file error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt vector buffer: {0}")]
    Corrupt(String),

    #[error("missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),
}

#[derive(Debug, Error)]
pub enum EmbedderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedder returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding request failed: {0}")]
    Request(String),
}

pub type Result<T, E = RetrievalError> = std::result::Result<T, E>;
