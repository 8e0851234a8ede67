//! Error types for catalog ingestion
//!
//! Two layers: [`StoreError`] describes what a document store call returned,
//! [`IngestError`] classifies failures by the pipeline phase that hit them.
//! Only `Initialization`, `InputRead` and `Config` are fatal to a run; the
//! rest are folded into the outcome tally.

use std::time::Duration;
use thiserror::Error;

use crate::pipeline::RunPhase;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Failure kinds reported by a document store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or the connection broke mid-call
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within the caller-supplied bound
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// The addressed collection or document does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A create precondition failed because the document already exists
    #[error("document already exists: {0}")]
    Conflict(String),

    /// The store answered but refused the request
    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl StoreError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether the failure happened before the store gave an answer
    pub fn is_transport(&self) -> bool {
        matches!(self, StoreError::Transport(_) | StoreError::Timeout(_))
    }
}

/// Error taxonomy of an ingestion run
#[derive(Error, Debug)]
pub enum IngestError {
    /// The store client could not be built or reached; nothing was attempted
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// The input file was missing, unreadable or not a JSON array
    #[error("Failed to read input '{path}': {reason}")]
    InputRead { path: String, reason: String },

    /// An identity lookup for one record failed
    #[error("Lookup failed for '{id}': {source}")]
    Lookup {
        id: String,
        #[source]
        source: StoreError,
    },

    /// A chunk commit failed; every record in the chunk is affected
    #[error("Commit of chunk {chunk} ({records} records) failed: {source}")]
    Commit {
        chunk: usize,
        records: usize,
        #[source]
        source: StoreError,
    },

    /// The post-run count query failed
    #[error("Verification read failed: {0}")]
    Verification(#[source] StoreError),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The run state machine was asked to move backwards or skip ahead
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: RunPhase, to: RunPhase },

    /// A direct store call outside the batch path failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Create an initialization error
    pub fn initialization(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    /// Create an input read error
    pub fn input_read(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InputRead {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kinds() {
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_transport());
        assert!(StoreError::transport("connection refused").is_transport());
        assert!(!StoreError::NotFound("exercises".into()).is_transport());
        assert!(!StoreError::Rejected {
            status: 403,
            message: "denied".into()
        }
        .is_transport());
    }

    #[test]
    fn test_commit_error_message() {
        let err = IngestError::Commit {
            chunk: 2,
            records: 200,
            source: StoreError::transport("connection reset"),
        };
        assert_eq!(
            err.to_string(),
            "Commit of chunk 2 (200 records) failed: transport error: connection reset"
        );
    }
}
