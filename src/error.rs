//! Error types for the retrieval core.
//!
//! The rest of the crate reports failures with `anyhow`. Retrieval keeps a
//! typed error so callers can tell a failing collaborator apart from a
//! question that simply has no matching data (which is an empty
//! [`ResultSet`](crate::models::ResultSet), never an error).

use thiserror::Error;

/// Result type alias for retrieval operations.
pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

#[derive(Error, Debug)]
pub enum RetrievalError {
    /// The embedding provider failed or returned an unusable vector.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The vector index failed to answer.
    #[error("index error: {0}")]
    Index(String),

    /// The request itself is malformed (empty team name, zero results, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// `only_played` and `only_future` were both requested. No date can be
    /// both, so the combination is rejected instead of returning nothing.
    #[error("invalid request: only_played and only_future are mutually exclusive")]
    ConflictingTemporalScope,
}

impl RetrievalError {
    /// `true` when a collaborator failed, as opposed to a bad request.
    pub fn is_service_failure(&self) -> bool {
        matches!(self, RetrievalError::Embedding(_) | RetrievalError::Index(_))
    }
}

/// Failure of a full question-answering request.
#[derive(Error, Debug)]
pub enum AskError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("answer generation is disabled; set [generation] provider in config")]
    GenerationDisabled,

    #[error("answer generation failed: {0}")]
    Generation(String),
}
