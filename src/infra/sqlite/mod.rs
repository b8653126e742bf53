//! SQLite implementation of the ledger store
//!
//! Used for embedded deployments, the admin CLI default and tests.

mod ledger_store;

pub use ledger_store::*;
