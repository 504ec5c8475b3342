//! Error types shared by the balancer and the node agents.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No nodes available for placement")]
    NoCapacity,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Node {node} unreachable: {reason}")]
    Unreachable { node: String, reason: String },

    #[error("Block {index} of file {file_name} is missing")]
    MissingBlock { file_name: String, index: u32 },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl StoreError {
    /// A node that timed out or refused the connection may answer a later call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unreachable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_) | StoreError::MissingBlock { .. }
        )
    }
}
