//! Infrastructure layer for the civic ledger
//!
//! Contains trait definitions and implementations for:
//! - Ledger storage (PostgreSQL, SQLite)
//! - Evidence blob storage (filesystem, memory)
//! - The process/event service that guards and chains every write
//! - Retry with backoff for chain-head conflicts

mod blob;
mod error;
pub mod postgres;
mod retry;
mod service;
pub mod sqlite;
mod traits;

pub use blob::{FsBlobStore, MemoryBlobStore};
pub use error::*;
pub use postgres::PgLedgerStore;
pub use retry::{Retry, RetryConfig};
pub use service::{LedgerService, MAX_PAYLOAD_DEPTH};
pub use sqlite::SqliteLedgerStore;
pub use traits::*;
