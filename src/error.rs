//! Error types for the batching system.

use std::time::Duration;

use thiserror::Error;

use crate::operation::ClientIndex;

/// Result type alias using the barrage error type.
pub type Result<T> = std::result::Result<T, BarrageError>;

/// Main error type for the batching system.
///
/// Errors fall into two groups. Fatal errors (see [`BarrageError::is_fatal`]) abort a
/// batch before or during execution and no summary is produced. Every other error is
/// recovered by the executing strategy into a failed
/// [`OperationResult`](crate::operation::OperationResult) for the operation that
/// raised it.
#[derive(Error, Debug)]
pub enum BarrageError {
    /// `push` was called with nothing queued
    #[error("No operation in the queue")]
    EmptyQueue,

    /// The operation can never be submitted as written (missing target, bad entity type)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Two queued operations claim the same client index
    #[error("Duplicate client index {0} in queue")]
    DuplicateIndex(ClientIndex),

    /// The configured strategy name does not match any known strategy
    #[error("Unknown execution strategy '{0}'")]
    UnknownStrategy(String),

    /// Configuration could not be parsed or is out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// The submitter cannot accept work at all
    #[error("Submitter unavailable: {0}")]
    SubmitterUnavailable(String),

    /// A strategy returned a result set that breaks the one-result-per-operation contract
    #[error("Strategy returned {actual} results for {expected} operations")]
    IncompleteResults { expected: usize, actual: usize },

    /// The remote API answered with a non-success status
    #[error("API rejected operation with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The call did not complete within its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The unit executing an operation terminated abnormally
    #[error("Execution unit terminated: {0}")]
    TaskTerminated(String),

    /// The call never got an answer (connection refused, reset, DNS)
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BarrageError {
    /// Returns true if this error must abort the whole batch.
    ///
    /// Fatal errors come from setup (queue validation, configuration, an unusable
    /// submitter) or from a submitter that flags its input as malformed. They are
    /// never folded into a per-operation failure.
    pub fn is_fatal(&self) -> bool {
        match self {
            BarrageError::EmptyQueue
            | BarrageError::InvalidOperation(_)
            | BarrageError::DuplicateIndex(_)
            | BarrageError::UnknownStrategy(_)
            | BarrageError::Config(_)
            | BarrageError::SubmitterUnavailable(_)
            | BarrageError::IncompleteResults { .. } => true,
            BarrageError::Rejected { .. }
            | BarrageError::Timeout(_)
            | BarrageError::TaskTerminated(_)
            | BarrageError::Network(_)
            | BarrageError::Http(_)
            | BarrageError::Serialization(_)
            | BarrageError::Other(_) => false,
        }
    }
}
