//! Deterministic hashing for the civic ledger
//!
//! Every event hash in a chain is computed from a length-prefixed, domain
//! separated preimage so that independent implementations reproduce the
//! exact same digest:
//! - RFC 8785 JSON Canonicalization Scheme (JCS) for payloads
//! - Big-endian length prefixes for every variable-length field
//! - RFC 3339 timestamps with fixed microsecond precision
//!
//! # RFC 8785 Compliance
//!
//! Payload canonicalization is delegated to `serde_json_canonicalizer`:
//! - Deterministic key ordering (lexicographic UTF-8)
//! - ES6-compatible number serialization
//! - Proper Unicode handling

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// 32-byte SHA-256 hash
pub type Hash256 = [u8; 32];

// ============================================================================
// Domain Separation Constants
// ============================================================================

/// Domain prefix for ledger event chain hashing
pub const DOMAIN_EVENT: &[u8] = b"CIVIC_LEDGER_EVENT_V1";

/// Parent hash of the first event in every chain
pub const GENESIS_HASH: Hash256 = [0u8; 32];

// ============================================================================
// Binary Encoding Helpers
// ============================================================================

/// Encode a u32 as 4 bytes big-endian
#[inline]
pub fn u32_be(n: u32) -> [u8; 4] {
    n.to_be_bytes()
}

/// Encode a string as length-prefixed UTF-8 bytes
/// Format: U32_BE(len) || UTF8_bytes
pub fn encode_string(s: &str) -> Vec<u8> {
    let utf8_bytes = s.as_bytes();
    let mut result = Vec::with_capacity(4 + utf8_bytes.len());
    result.extend_from_slice(&u32_be(utf8_bytes.len() as u32));
    result.extend_from_slice(utf8_bytes);
    result
}

// ============================================================================
// Canonical JSON (RFC 8785 JCS)
// ============================================================================

/// Convert a JSON value to its canonical string representation per RFC 8785.
///
/// `serde_json::Value` cannot hold NaN or Infinity, so this only fails on
/// serializer-internal errors.
pub fn canonicalize_json(value: &serde_json::Value) -> Result<String, serde_json::Error> {
    serde_json_canonicalizer::to_string(value)
}

/// SHA-256 over the canonical JSON encoding of a value
pub fn canonical_json_hash(value: &serde_json::Value) -> Result<Hash256, serde_json::Error> {
    let canonical = canonicalize_json(value)?;
    Ok(sha256(canonical.as_bytes()))
}

/// Render a timestamp the way it enters the hash preimage.
///
/// Always UTC, always six fractional digits, always a `Z` suffix.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ============================================================================
// Event Chain Hash
// ============================================================================

/// Fields covered by an event's chain hash
pub struct EventHashParams<'a> {
    pub parent_event_hash: &'a Hash256,
    pub event_type: &'a str,
    pub actor_hash: &'a str,
    pub payload: &'a serde_json::Value,
    pub created_at: &'a DateTime<Utc>,
    pub entity_id: &'a str,
}

/// Compute the chain hash of a ledger event
///
/// ```text
/// event_preimage =
///   b"CIVIC_LEDGER_EVENT_V1" ||
///   parent_event_hash(32) ||
///   ENC_STR(event_type) ||
///   ENC_STR(actor_hash) ||
///   ENC_STR(JCS(payload)) ||
///   ENC_STR(created_at) ||
///   ENC_STR(entity_id)
///
/// current_event_hash = SHA256(event_preimage)
/// ```
pub fn compute_event_hash(params: &EventHashParams) -> Result<Hash256, serde_json::Error> {
    let canonical_payload = canonicalize_json(params.payload)?;

    let mut hasher = Sha256::new();

    // Domain prefix
    hasher.update(DOMAIN_EVENT);

    // Link to the previous event
    hasher.update(params.parent_event_hash);

    // Length-prefixed fields
    hasher.update(encode_string(params.event_type));
    hasher.update(encode_string(params.actor_hash));
    hasher.update(encode_string(&canonical_payload));
    hasher.update(encode_string(&canonical_timestamp(params.created_at)));
    hasher.update(encode_string(params.entity_id));

    Ok(hasher.finalize().into())
}

// ============================================================================
// Content Digests
// ============================================================================

/// Compute SHA-256 hash of raw bytes
pub fn sha256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex SHA-256 of raw bytes, the content address of an evidence file
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap()
    }

    fn params<'a>(
        parent: &'a Hash256,
        payload: &'a serde_json::Value,
        created_at: &'a DateTime<Utc>,
    ) -> EventHashParams<'a> {
        EventHashParams {
            parent_event_hash: parent,
            event_type: "StatusChanged",
            actor_hash: "actor-abc",
            payload,
            created_at,
            entity_id: "0f8fad5b-d9cb-469f-a165-70867728950e",
        }
    }

    #[test]
    fn test_encode_string() {
        let encoded = encode_string("abc");
        assert_eq!(encoded, vec![0, 0, 0, 3, b'a', b'b', b'c']);
        assert_eq!(encode_string(""), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": 2, "a": {"d": 4, "c": 3}});
        assert_eq!(
            canonicalize_json(&value).unwrap(),
            r#"{"a":{"c":3,"d":4},"b":2}"#
        );
    }

    #[test]
    fn test_canonical_timestamp_has_micros() {
        let ts = fixed_time();
        assert_eq!(canonical_timestamp(&ts), "2025-03-14T15:09:26.000000Z");
    }

    #[test]
    fn test_event_hash_deterministic() {
        let ts = fixed_time();
        let payload = json!({"status": "open"});
        let h1 = compute_event_hash(&params(&GENESIS_HASH, &payload, &ts)).unwrap();
        let h2 = compute_event_hash(&params(&GENESIS_HASH, &payload, &ts)).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_event_hash_key_order_independent() {
        let ts = fixed_time();
        let p1 = json!({"a": 1, "b": [1, 2]});
        let p2 = json!({"b": [1, 2], "a": 1});
        assert_eq!(
            compute_event_hash(&params(&GENESIS_HASH, &p1, &ts)).unwrap(),
            compute_event_hash(&params(&GENESIS_HASH, &p2, &ts)).unwrap()
        );
    }

    #[test]
    fn test_event_hash_covers_every_field() {
        let ts = fixed_time();
        let payload = json!({"status": "open"});
        let base = compute_event_hash(&params(&GENESIS_HASH, &payload, &ts)).unwrap();

        let other_parent = [7u8; 32];
        assert_ne!(
            base,
            compute_event_hash(&params(&other_parent, &payload, &ts)).unwrap()
        );

        let other_payload = json!({"status": "closed"});
        assert_ne!(
            base,
            compute_event_hash(&params(&GENESIS_HASH, &other_payload, &ts)).unwrap()
        );

        let later = ts + chrono::Duration::microseconds(1);
        assert_ne!(
            base,
            compute_event_hash(&params(&GENESIS_HASH, &payload, &later)).unwrap()
        );

        let mut p = params(&GENESIS_HASH, &payload, &ts);
        p.event_type = "CitizenNoteAdded";
        assert_ne!(base, compute_event_hash(&p).unwrap());

        let mut p = params(&GENESIS_HASH, &payload, &ts);
        p.actor_hash = "actor-xyz";
        assert_ne!(base, compute_event_hash(&p).unwrap());

        let mut p = params(&GENESIS_HASH, &payload, &ts);
        p.entity_id = "another-entity";
        assert_ne!(base, compute_event_hash(&p).unwrap());
    }

    #[test]
    fn test_length_prefix_prevents_field_shifting() {
        // "ab" + "c" must not collide with "a" + "bc"
        let ts = fixed_time();
        let payload = json!({});
        let mut p1 = params(&GENESIS_HASH, &payload, &ts);
        p1.event_type = "ab";
        p1.actor_hash = "c";
        let mut p2 = params(&GENESIS_HASH, &payload, &ts);
        p2.event_type = "a";
        p2.actor_hash = "bc";
        assert_ne!(
            compute_event_hash(&p1).unwrap(),
            compute_event_hash(&p2).unwrap()
        );
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
