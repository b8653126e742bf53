//! Structured error responses with stable error codes
//!
//! Every [`LedgerError`] maps to exactly one [`ErrorCode`], which carries an
//! HTTP-style status and a retryable flag. Callers that expose the ledger over
//! a transport render [`ErrorResponse`] as the body.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::ChainVerification;
use crate::infra::LedgerError;

// ============================================================================
// Error Codes
// ============================================================================

/// Error codes for ledger responses
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Admission errors (3xxx)
    /// Malformed or missing input
    ValidationError,
    /// Suspected PII in a caller-supplied field
    PiiDetected,
    /// Evidence MIME type not on the allowlist
    FileTypeNotAllowed,
    /// Evidence exceeds its category ceiling
    FileTooLarge,

    // Resource errors (4xxx)
    /// Process does not exist
    ProcessNotFound,

    // Conflict errors (5xxx)
    /// An object already exists at the evidence storage path
    EvidencePathConflict,

    // Integrity errors (7xxx)
    /// A stored chain failed verification
    ChainIntegrityViolation,

    // Infrastructure errors (8xxx)
    /// Database or blob store unavailable, or chain head contended
    BackendUnavailable,
    /// Internal error
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn numeric_code(&self) -> u32 {
        match self {
            ErrorCode::ValidationError => 3001,
            ErrorCode::PiiDetected => 3002,
            ErrorCode::FileTypeNotAllowed => 3003,
            ErrorCode::FileTooLarge => 3004,

            ErrorCode::ProcessNotFound => 4001,

            ErrorCode::EvidencePathConflict => 5001,

            ErrorCode::ChainIntegrityViolation => 7001,

            ErrorCode::BackendUnavailable => 8002,
            ErrorCode::InternalError => 8999,
        }
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ValidationError
            | ErrorCode::PiiDetected
            | ErrorCode::FileTypeNotAllowed
            | ErrorCode::FileTooLarge => 400,
            ErrorCode::ProcessNotFound => 404,
            ErrorCode::EvidencePathConflict | ErrorCode::ChainIntegrityViolation => 409,
            ErrorCode::BackendUnavailable => 503,
            ErrorCode::InternalError => 500,
        }
    }

    /// Whether the same request may succeed if repeated
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorCode::BackendUnavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::PiiDetected => "PII_DETECTED",
            ErrorCode::FileTypeNotAllowed => "FILE_TYPE_NOT_ALLOWED",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::ProcessNotFound => "PROCESS_NOT_FOUND",
            ErrorCode::EvidencePathConflict => "EVIDENCE_PATH_CONFLICT",
            ErrorCode::ChainIntegrityViolation => "CHAIN_INTEGRITY_VIOLATION",
            ErrorCode::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&LedgerError> for ErrorCode {
    fn from(err: &LedgerError) -> Self {
        match err {
            LedgerError::Validation(_) => ErrorCode::ValidationError,
            LedgerError::PiiDetected { .. } => ErrorCode::PiiDetected,
            LedgerError::FileTypeNotAllowed { .. } => ErrorCode::FileTypeNotAllowed,
            LedgerError::FileTooLarge { .. } => ErrorCode::FileTooLarge,
            LedgerError::ProcessNotFound(_) => ErrorCode::ProcessNotFound,
            LedgerError::EvidencePathConflict(_) => ErrorCode::EvidencePathConflict,
            LedgerError::HeadConflict { .. }
            | LedgerError::Database(_)
            | LedgerError::Storage(_) => ErrorCode::BackendUnavailable,
            LedgerError::Serialization(_)
            | LedgerError::Configuration(_)
            | LedgerError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

// ============================================================================
// Structured Error Response
// ============================================================================

/// Error body: `{ok: false, error, message, details}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false
    pub ok: bool,

    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: code,
            message: message.into(),
            details: None,
        }
    }

    /// Set additional details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(&self) -> u16 {
        self.error.http_status()
    }

    pub fn retryable(&self) -> bool {
        self.error.retryable()
    }

    /// Error body for a failed verification, `None` if the chain is intact
    pub fn from_verification(verification: &ChainVerification) -> Option<Self> {
        let broken = verification.broken_at.as_ref()?;
        Some(
            ErrorResponse::new(
                ErrorCode::ChainIntegrityViolation,
                format!(
                    "chain broken at sequence {}: {}",
                    broken.sequence_number, broken.reason
                ),
            )
            .with_details(json!({
                "event_id": broken.event_id,
                "sequence_number": broken.sequence_number,
                "reason": broken.reason,
                "details": broken.details,
                "events_checked": verification.events_checked,
            })),
        )
    }
}

// ============================================================================
// Conversion from LedgerError
// ============================================================================

impl From<&LedgerError> for ErrorResponse {
    fn from(err: &LedgerError) -> Self {
        let code = ErrorCode::from(err);

        match err {
            LedgerError::PiiDetected { field, sample } => {
                ErrorResponse::new(code, err.to_string()).with_details(json!({
                    "field": field,
                    "sample": sample,
                }))
            }
            LedgerError::FileTypeNotAllowed { mime_type } => {
                ErrorResponse::new(code, err.to_string()).with_details(json!({
                    "mime_type": mime_type,
                }))
            }
            LedgerError::FileTooLarge {
                size_bytes,
                max_bytes,
                mime_type,
            } => ErrorResponse::new(code, err.to_string()).with_details(json!({
                "mime_type": mime_type,
                "size_bytes": size_bytes,
                "max_bytes": max_bytes,
            })),
            LedgerError::ProcessNotFound(process_id) => {
                ErrorResponse::new(code, err.to_string()).with_details(json!({
                    "process_id": process_id.to_string(),
                }))
            }
            LedgerError::EvidencePathConflict(path) => {
                ErrorResponse::new(code, err.to_string()).with_details(json!({
                    "storage_path": path,
                }))
            }
            // Backend internals are not echoed to callers
            LedgerError::Database(_) | LedgerError::Storage(_) => {
                ErrorResponse::new(code, "storage backend unavailable")
            }
            LedgerError::HeadConflict { .. } => {
                ErrorResponse::new(code, "process is busy, retry the request")
            }
            LedgerError::Serialization(_)
            | LedgerError::Configuration(_)
            | LedgerError::Internal(_) => ErrorResponse::new(code, "internal error"),
            LedgerError::Validation(_) => ErrorResponse::new(code, err.to_string()),
        }
    }
}

impl From<LedgerError> for ErrorResponse {
    fn from(err: LedgerError) -> Self {
        ErrorResponse::from(&err)
    }
}

// ============================================================================
// Tests
// ============================================================================
