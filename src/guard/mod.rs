//! Admission guards applied before anything is written to a ledger

mod pii;

pub use pii::{json_depth, pii_suspected, scan, PiiScan, MAX_SCAN_DEPTH, SAMPLE_MAX_CHARS};
