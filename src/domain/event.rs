//! Ledger event record and chain head
//!
//! A `LedgerEvent` is one append-only link in a process's hash chain. Only the
//! ledger service constructs events; callers receive them back as receipts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{compute_event_hash, EventHashParams, GENESIS_HASH};

use super::{hash256_hex, EntityType, EventType, Hash256};

/// One append-only record in an entity's hash chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Globally unique event identifier
    pub event_id: Uuid,

    /// 1-based position in the entity's chain
    pub sequence_number: u64,

    /// Ledger the event belongs to
    pub entity_type: EntityType,
    pub entity_id: String,

    pub event_type: EventType,

    /// Pseudonymous actor identifier, opaque to the ledger
    pub actor_hash: String,

    pub payload: serde_json::Value,

    /// Chain hash of the preceding event, or all zeroes for the first event
    #[serde(with = "hash256_hex")]
    pub parent_event_hash: Hash256,

    /// SHA-256 over the canonical encoding of this event
    #[serde(with = "hash256_hex")]
    pub current_event_hash: Hash256,

    /// Microsecond precision, strictly increasing within a chain
    pub created_at: DateTime<Utc>,
}

impl LedgerEvent {
    /// Build the next event of a chain on top of `head`.
    ///
    /// The timestamp is `max(now, head.created_at + 1µs)` truncated to
    /// microseconds so that it survives storage round-trips unchanged.
    pub fn next(
        head: Option<&ChainHead>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        event_type: EventType,
        actor_hash: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let (sequence_number, parent_event_hash, created_at) = match head {
            Some(head) => {
                let floor = head.created_at + Duration::microseconds(1);
                let now = truncate_to_micros(now);
                (
                    head.sequence + 1,
                    head.event_hash,
                    if now > floor { now } else { floor },
                )
            }
            None => (1, GENESIS_HASH, truncate_to_micros(now)),
        };

        let mut event = Self {
            event_id: Uuid::new_v4(),
            sequence_number,
            entity_type,
            entity_id: entity_id.into(),
            event_type,
            actor_hash: actor_hash.into(),
            payload,
            parent_event_hash,
            current_event_hash: [0u8; 32],
            created_at,
        };
        event.current_event_hash = event.compute_hash()?;
        Ok(event)
    }

    /// Recompute the chain hash from the stored fields
    pub fn compute_hash(&self) -> Result<Hash256, serde_json::Error> {
        compute_event_hash(&EventHashParams {
            parent_event_hash: &self.parent_event_hash,
            event_type: self.event_type.as_str(),
            actor_hash: &self.actor_hash,
            payload: &self.payload,
            created_at: &self.created_at,
            entity_id: &self.entity_id,
        })
    }

    /// The chain head this event establishes once persisted
    pub fn as_head(&self) -> ChainHead {
        ChainHead {
            sequence: self.sequence_number,
            event_hash: self.current_event_hash,
            created_at: self.created_at,
        }
    }

    pub fn current_event_hash_hex(&self) -> String {
        hex::encode(self.current_event_hash)
    }

    pub fn parent_event_hash_hex(&self) -> String {
        hex::encode(self.parent_event_hash)
    }
}

/// Content of an event before it is placed on a chain
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub event_type: EventType,
    pub actor_hash: String,
    pub payload: serde_json::Value,
}

impl EventDraft {
    /// Build the event that extends `head` with this content
    pub fn link(
        &self,
        head: Option<&ChainHead>,
        now: DateTime<Utc>,
    ) -> Result<LedgerEvent, serde_json::Error> {
        LedgerEvent::next(
            head,
            self.entity_type.clone(),
            self.entity_id.clone(),
            self.event_type.clone(),
            self.actor_hash.clone(),
            self.payload.clone(),
            now,
        )
    }
}

/// Latest link of an entity's chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub sequence: u64,
    #[serde(with = "hash256_hex")]
    pub event_hash: Hash256,
    pub created_at: DateTime<Utc>,
}

/// Drop sub-microsecond precision
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}
