//! Evidence pointers and the upload admission policy
//!
//! Raw evidence bytes live in a blob store under a deterministic key; the
//! ledger records an `EvidencePointer` and an `EvidenceSubmitted` event that
//! references the same content digest.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{EvidenceId, LedgerEvent, ProcessId};

const MIB: u64 = 1024 * 1024;

/// MIME type recorded when the client declares none
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// File name used when the declared name is empty or looks like PII
pub const DEFAULT_FILE_NAME: &str = "evidence";

/// Marks chained evidence as the raw upload, before any redaction pass
pub const EVIDENCE_RAW_NOTE: &str =
    "Evidence submitted (raw). Next phase: sanitize/redact + metadata removal.";

/// Accepted evidence MIME types
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "application/pdf",
    "audio/mpeg",
    "audio/mp3",
    "audio/mp4",
    "audio/x-m4a",
    "audio/aac",
    "video/mp4",
];

static UNSAFE_NAME_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^A-Za-z0-9_.\-]+").expect("file name pattern is valid")
});

/// Evidence category, each with its own size ceiling and storage prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceCategory {
    Image,
    Document,
    Audio,
    Video,
}

impl EvidenceCategory {
    /// Classify an allowlisted MIME type. Unlisted types have no category.
    pub fn for_mime(mime: &str) -> Option<Self> {
        if !ALLOWED_MIME_TYPES.contains(&mime) {
            return None;
        }
        if mime.starts_with("image/") {
            Some(Self::Image)
        } else if mime == "application/pdf" {
            Some(Self::Document)
        } else if mime.starts_with("audio/") {
            Some(Self::Audio)
        } else if mime.starts_with("video/") {
            Some(Self::Video)
        } else {
            None
        }
    }

    /// Inclusive size ceiling in bytes
    pub fn max_bytes(&self) -> u64 {
        match self {
            Self::Image => 10 * MIB,
            Self::Document => 15 * MIB,
            Self::Audio => 25 * MIB,
            Self::Video => 50 * MIB,
        }
    }

    /// Path segment used in storage keys
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image => "img",
            Self::Document => "pdf",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// Why an upload was refused by the admission policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    EmptyFile,
    TypeNotAllowed {
        mime_type: String,
    },
    TooLarge {
        size_bytes: u64,
        max_bytes: u64,
        mime_type: String,
    },
}

/// Trim and lowercase a declared MIME type, defaulting when empty
pub fn normalize_mime(declared: &str) -> String {
    let mime = declared.trim().to_ascii_lowercase();
    if mime.is_empty() {
        DEFAULT_MIME.to_string()
    } else {
        mime
    }
}

/// Check a normalized MIME type and size against the policy table
pub fn admit(mime: &str, size_bytes: u64) -> Result<EvidenceCategory, PolicyViolation> {
    let category = EvidenceCategory::for_mime(mime).ok_or_else(|| {
        PolicyViolation::TypeNotAllowed {
            mime_type: mime.to_string(),
        }
    })?;

    if size_bytes == 0 {
        return Err(PolicyViolation::EmptyFile);
    }

    let max_bytes = category.max_bytes();
    if size_bytes > max_bytes {
        return Err(PolicyViolation::TooLarge {
            size_bytes,
            max_bytes,
            mime_type: mime.to_string(),
        });
    }

    Ok(category)
}

/// Replace each run of characters outside `[A-Za-z0-9_.-]` with `_`
pub fn sanitize_file_name(declared: &str) -> String {
    let name = declared.trim();
    let name = if name.is_empty() {
        DEFAULT_FILE_NAME
    } else {
        name
    };
    UNSAFE_NAME_RUN.replace_all(name, "_").into_owned()
}

/// `{process_id}/{kind}/{unix_millis}_{sha256[0..12]}_{safe_name}`
pub fn storage_path(
    process_id: &ProcessId,
    category: EvidenceCategory,
    unix_millis: i64,
    sha256_hex: &str,
    declared_name: &str,
) -> String {
    let prefix = sha256_hex.get(..12).unwrap_or(sha256_hex);
    format!(
        "{}/{}/{}_{}_{}",
        process_id.entity_id(),
        category.kind(),
        unix_millis,
        prefix,
        sanitize_file_name(declared_name)
    )
}

/// A file submitted as evidence
#[derive(Debug, Clone)]
pub struct EvidenceUpload {
    pub bytes: Vec<u8>,
    pub declared_mime: String,
    pub declared_name: String,
}

impl EvidenceUpload {
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        declared_mime: impl Into<String>,
        declared_name: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            declared_mime: declared_mime.into(),
            declared_name: declared_name.into(),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Metadata record for a stored evidence file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidencePointer {
    pub evidence_id: EvidenceId,
    pub process_id: ProcessId,
    pub actor_hash: String,
    pub storage_bucket: String,
    pub storage_path: String,
    /// Lowercase hex SHA-256 of the raw bytes
    pub sha256: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl EvidencePointer {
    /// Payload of the `EvidenceSubmitted` event that references this pointer
    pub fn event_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "evidence_id": self.evidence_id,
            "sha256": self.sha256,
            "storage_bucket": self.storage_bucket,
            "storage_path": self.storage_path,
            "mime_type": self.mime_type,
            "size_bytes": self.size_bytes,
            "note": EVIDENCE_RAW_NOTE,
        })
    }
}

/// Returned after evidence has been stored and chained
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceReceipt {
    pub evidence_id: EvidenceId,
    pub sha256: String,
    pub storage_bucket: String,
    pub storage_path: String,
    pub event: LedgerEvent,
}
