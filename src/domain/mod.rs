//! Domain models for the civic ledger
//!
//! Processes, chained ledger events, evidence pointers and the chain
//! verification routine. Nothing in here touches storage.

mod chain;
mod event;
mod evidence;
mod process;
mod types;

pub use chain::*;
pub use event::*;
pub use evidence::*;
pub use process::*;
pub use types::*;
