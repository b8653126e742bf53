//! Civic Ledger Library
//!
//! Tamper-evident, append-only ledger for civic processes. Every process owns
//! a SHA-256 hash chain of events; caller input passes a PII admission guard
//! before it can be chained; evidence files are stored write-once and anchored
//! into the chain by content hash.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (processes, ledger events, evidence, chain verification)
//! - [`guard`] - PII admission guard
//! - [`crypto`] - Canonical JSON and event chain hashing
//! - [`infra`] - Ledger service, stores (PostgreSQL, SQLite) and blob storage
//! - [`api`] - Stable error codes and error bodies
//! - [`config`] - Environment configuration
//! - [`telemetry`] - Logging setup

pub mod api;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod guard;
pub mod infra;
pub mod migrations;
pub mod telemetry;

// Re-export commonly used types
pub use domain::{
    ChainVerification, EntityType, EventType, EvidenceId, EvidencePointer, EvidenceReceipt,
    EvidenceUpload, Hash256, LedgerEvent, ProcessCreated, ProcessEntity, ProcessId,
};

pub use infra::{
    BlobStore, LedgerError, LedgerService, LedgerStore, ProcessLedger, Result,
};
