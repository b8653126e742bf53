//! PostgreSQL implementation of the ledger store
//!
//! Multi-connection server deployments; chain heads are row-locked per entity.

mod ledger_store;

pub use ledger_store::*;
