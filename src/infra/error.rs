//! Error types for the civic ledger

use thiserror::Error;

use crate::domain::{PolicyViolation, ProcessId};

/// Errors that can occur while admitting, storing or reading ledger data
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Malformed or missing input
    #[error("validation error: {0}")]
    Validation(String),

    /// Suspected PII in a caller-supplied field. The sample is not rendered.
    #[error("suspected PII in {field}")]
    PiiDetected { field: String, sample: String },

    /// Evidence MIME type not on the allowlist
    #[error("file type not allowed: {mime_type}")]
    FileTypeNotAllowed { mime_type: String },

    /// Evidence larger than its category ceiling
    #[error("file too large: {size_bytes} bytes exceeds {max_bytes} for {mime_type}")]
    FileTooLarge {
        size_bytes: u64,
        max_bytes: u64,
        mime_type: String,
    },

    /// Process does not exist
    #[error("process not found: {0}")]
    ProcessNotFound(ProcessId),

    /// An object already exists at the evidence storage path
    #[error("evidence path already exists: {0}")]
    EvidencePathConflict(String),

    /// The chain head moved between read and append
    #[error("chain head moved for {entity_type}/{entity_id}")]
    HeadConflict {
        entity_type: String,
        entity_id: String,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Blob store error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Transient failures that a caller may retry unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HeadConflict { .. } | Self::Database(_) | Self::Storage(_)
        )
    }
}

impl From<PolicyViolation> for LedgerError {
    fn from(violation: PolicyViolation) -> Self {
        match violation {
            PolicyViolation::EmptyFile => Self::Validation("evidence file is empty".to_string()),
            PolicyViolation::TypeNotAllowed { mime_type } => Self::FileTypeNotAllowed { mime_type },
            PolicyViolation::TooLarge {
                size_bytes,
                max_bytes,
                mime_type,
            } => Self::FileTooLarge {
                size_bytes,
                max_bytes,
                mime_type,
            },
        }
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;
