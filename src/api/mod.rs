//! Caller-facing surface of the ledger
//!
//! Stable error codes and the error body shape for transports built on top of
//! [`crate::infra::ProcessLedger`].

mod error;

pub use error::*;
