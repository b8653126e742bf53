//! Core type definitions for the civic ledger

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use crate::crypto::Hash256;

/// Maximum length of an event type tag, in characters
pub const MAX_EVENT_TYPE_LEN: usize = 64;

/// Maximum length of an actor hash, in characters
pub const MAX_ACTOR_HASH_LEN: usize = 256;

/// Maximum length of a process type label, in characters
pub const MAX_PROCESS_TYPE_LEN: usize = 128;

/// Serde module for serializing Hash256 as hex strings
pub mod hash256_hex {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes for Hash256"))
    }
}

/// Decode a 64-character hex string into a Hash256
pub fn hash256_from_hex(s: &str) -> Option<Hash256> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

/// Civic process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub uuid::Uuid);

impl ProcessId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Entity id of this process's ledger: the hyphenated lowercase UUID
    pub fn entity_id(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Evidence pointer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceId(pub uuid::Uuid);

impl EvidenceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl Default for EvidenceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EvidenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EvidenceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Entity type classification
/// Uses a simple string wrapper that handles both known and custom types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(pub String);

impl EntityType {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self(entity_type.into())
    }

    pub fn process() -> Self {
        Self(Self::PROCESS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub const PROCESS: &'static str = "process";
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Event type tag from an open set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(pub String);

impl EventType {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Event types only the ledger itself may write
    pub fn is_reserved(&self) -> bool {
        matches!(
            self.0.as_str(),
            Self::PROCESS_CREATED | Self::EVIDENCE_SUBMITTED
        )
    }

    pub const PROCESS_CREATED: &'static str = "ProcessCreated";
    pub const STATUS_CHANGED: &'static str = "StatusChanged";
    pub const CITIZEN_NOTE_ADDED: &'static str = "CitizenNoteAdded";
    pub const EVIDENCE_SUBMITTED: &'static str = "EvidenceSubmitted";
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id_entity_id_is_hyphenated_lowercase() {
        let id: ProcessId = "0F8FAD5B-D9CB-469F-A165-70867728950E".parse().unwrap();
        assert_eq!(id.entity_id(), "0f8fad5b-d9cb-469f-a165-70867728950e");
    }

    #[test]
    fn test_process_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<ProcessId>().is_err());
    }

    #[test]
    fn test_reserved_event_types() {
        assert!(EventType::new(EventType::PROCESS_CREATED).is_reserved());
        assert!(EventType::new(EventType::EVIDENCE_SUBMITTED).is_reserved());
        assert!(!EventType::new(EventType::STATUS_CHANGED).is_reserved());
        assert!(!EventType::new("HearingScheduled").is_reserved());
    }

    #[test]
    fn test_hash256_from_hex() {
        let hex = "ab".repeat(32);
        assert_eq!(hash256_from_hex(&hex), Some([0xab; 32]));
        assert_eq!(hash256_from_hex("abcd"), None);
        assert_eq!(hash256_from_hex(&"zz".repeat(32)), None);
    }

    #[test]
    fn test_event_type_serializes_as_plain_string() {
        let json = serde_json::to_string(&EventType::new("StatusChanged")).unwrap();
        assert_eq!(json, "\"StatusChanged\"");
    }
}
