//! Cryptographic utilities for the civic ledger
//!
//! Provides:
//! - Canonical JSON hashing (deterministic, cross-language compatible)
//! - Event chain hashing with domain separation
//! - Content digests for evidence files

mod hash;

pub use hash::*;
