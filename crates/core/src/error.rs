//! Error and warning taxonomy for the extraction pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// A source document whose structure could not be parsed.
///
/// Fatal for that document only; the batch orchestrator records it and moves
/// on to sibling documents.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to parse {} at byte {offset}: {reason}", path.display())]
pub struct ParseError {
    pub path: PathBuf,
    /// Byte offset into the source text where the failure was detected.
    pub offset: usize,
    pub reason: String,
}

impl ParseError {
    pub fn new(path: impl Into<PathBuf>, offset: usize, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            offset,
            reason: reason.into(),
        }
    }
}

/// Invalid pipeline parameters. Detected before any document is read.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("overlap_percentage must be in [0, 1), got {0}")]
    OverlapOutOfRange(f64),

    #[error("max_session_exchanges must be at least 1")]
    ZeroSessionThreshold,

    #[error("window_stride must be at least 1")]
    ZeroStride,

    #[error("min_exchange_length ({min}) exceeds max_exchange_length ({max})")]
    InvertedLengthBounds { min: usize, max: usize },

    #[error("split ratios must be non-negative and sum to 1, got {train}/{validation}/{test}")]
    InvalidSplitRatios { train: f64, validation: f64, test: f64 },

    #[error("unknown speaker role {0:?} in alias table, expected \"therapist\" or \"client\"")]
    UnknownRole(String),

    #[error("plaintext_delimiter must not be empty")]
    EmptyDelimiter,

    #[error("failed to read config file {path}: {message}")]
    Unreadable { path: String, message: String },
}

/// Failure reading or writing persisted collections and datasets.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error on {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} is not a session file: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

/// Umbrella error for the orchestration layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("no source documents found under {}", .0.display())]
    NoDocuments(PathBuf),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Non-fatal data loss observed while parsing a document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Warning {
    /// A detected session boundary enclosed no attributable exchanges.
    #[error("session boundary {boundary} ({title}) has no exchanges, skipped")]
    EmptySession { boundary: usize, title: String },
    /// A text block that could not be assigned to a speaker was dropped.
    #[error("unattributed block at byte {offset} dropped: {preview:?}")]
    UnattributedBlock { offset: usize, preview: String },
}
