//! Chain verification
//!
//! Replays a stored event sequence and reports the first break. Verification
//! is read-only and independent of the storage backend.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::GENESIS_HASH;

use super::LedgerEvent;

/// Why a chain failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainBreakReason {
    /// Sequence numbers are not contiguous from 1
    SequenceGap,
    /// Parent hash does not match the previous event's hash
    ParentMismatch,
    /// Stored hash does not match the recomputed hash
    HashMismatch,
    /// Timestamp is not after the previous event's
    TimestampRegression,
}

impl ChainBreakReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SequenceGap => "SEQUENCE_GAP",
            Self::ParentMismatch => "PARENT_MISMATCH",
            Self::HashMismatch => "HASH_MISMATCH",
            Self::TimestampRegression => "TIMESTAMP_REGRESSION",
        }
    }
}

impl std::fmt::Display for ChainBreakReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First broken link found during verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub event_id: Uuid,
    pub sequence_number: u64,
    pub reason: ChainBreakReason,
    pub details: String,
}

/// Outcome of replaying a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    /// Number of events checked before stopping
    pub events_checked: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<ChainBreak>,
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Verify an entity's events, ordered by sequence number.
///
/// Checks, per event and in this order: sequence continuity, parent link,
/// recomputed hash, then timestamp monotonicity. Stops at the first failure.
/// An empty chain is valid.
pub fn verify_chain(events: &[LedgerEvent]) -> ChainVerification {
    let mut expected_parent = GENESIS_HASH;
    let mut previous_created_at = None;

    for (index, event) in events.iter().enumerate() {
        let expected_sequence = index as u64 + 1;
        let checked = expected_sequence;

        let broken = |reason: ChainBreakReason, details: String| ChainVerification {
            valid: false,
            events_checked: checked,
            broken_at: Some(ChainBreak {
                event_id: event.event_id,
                sequence_number: event.sequence_number,
                reason,
                details,
            }),
        };

        if event.sequence_number != expected_sequence {
            return broken(
                ChainBreakReason::SequenceGap,
                format!(
                    "expected sequence {}, found {}",
                    expected_sequence, event.sequence_number
                ),
            );
        }

        if event.parent_event_hash != expected_parent {
            return broken(
                ChainBreakReason::ParentMismatch,
                format!(
                    "expected parent {}, found {}",
                    hex::encode(expected_parent),
                    event.parent_event_hash_hex()
                ),
            );
        }

        match event.compute_hash() {
            Ok(recomputed) if recomputed == event.current_event_hash => {}
            Ok(recomputed) => {
                return broken(
                    ChainBreakReason::HashMismatch,
                    format!(
                        "stored {}, recomputed {}",
                        event.current_event_hash_hex(),
                        hex::encode(recomputed)
                    ),
                );
            }
            Err(e) => {
                return broken(
                    ChainBreakReason::HashMismatch,
                    format!("payload could not be canonicalized: {}", e),
                );
            }
        }

        if let Some(previous) = previous_created_at {
            if event.created_at <= previous {
                return broken(
                    ChainBreakReason::TimestampRegression,
                    format!(
                        "created_at {} is not after {}",
                        event.created_at.to_rfc3339(),
                        previous.to_rfc3339()
                    ),
                );
            }
        }

        expected_parent = event.current_event_hash;
        previous_created_at = Some(event.created_at);
    }

    ChainVerification {
        valid: true,
        events_checked: events.len() as u64,
        broken_at: None,
    }
}
