//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for any valid input.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{json, Value};

use civic_ledger::crypto::{canonical_json_hash, compute_event_hash, EventHashParams, GENESIS_HASH};
use civic_ledger::domain::{
    admit, sanitize_file_name, storage_path, verify_chain, ChainBreakReason, EntityType,
    EvidenceCategory, EventType, LedgerEvent, PolicyViolation, ProcessId, ALLOWED_MIME_TYPES,
};
use civic_ledger::guard::{pii_suspected, scan};

// ============================================================================
// Custom Strategies
// ============================================================================

/// Generate a random 32-byte hash
fn arb_hash256() -> impl Strategy<Value = [u8; 32]> {
    any::<[u8; 32]>()
}

/// Generate a random event type
fn arb_event_type() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("StatusChanged".to_string()),
        Just("CitizenNoteAdded".to_string()),
        "[A-Z][A-Za-z]{2,30}".prop_map(|s| s),
    ]
}

/// Strings without digits or '@', so they can never look like PII
fn arb_clean_text() -> impl Strategy<Value = String> {
    "[a-zA-Z ,.;:_-]{0,40}"
}

/// Generate a random JSON leaf
fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        (-1.0e9f64..1.0e9f64).prop_map(|f| json!(f)),
        arb_clean_text().prop_map(Value::String),
    ]
}

/// Generate a random JSON payload free of PII
fn arb_payload() -> impl Strategy<Value = Value> {
    arb_leaf().prop_recursive(4, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,12}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Build a chain over the given payloads, one second apart
fn build_chain(entity_id: &str, payloads: &[Value]) -> Vec<LedgerEvent> {
    let mut events: Vec<LedgerEvent> = Vec::with_capacity(payloads.len());
    for (i, payload) in payloads.iter().enumerate() {
        let head = events.last().map(|e| e.as_head());
        let event = LedgerEvent::next(
            head.as_ref(),
            EntityType::process(),
            entity_id,
            EventType::new("StatusChanged"),
            "actor-token",
            payload.clone(),
            base_time() + Duration::seconds(i as i64),
        )
        .unwrap();
        events.push(event);
    }
    events
}

// ============================================================================
// Hashing Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_event_hash_deterministic(
        parent in arb_hash256(),
        event_type in arb_event_type(),
        actor in "[a-f0-9]{64}",
        payload in arb_payload(),
        offset in 0i64..1_000_000_000,
    ) {
        let created_at = base_time() + Duration::microseconds(offset);
        let params = EventHashParams {
            parent_event_hash: &parent,
            event_type: &event_type,
            actor_hash: &actor,
            payload: &payload,
            created_at: &created_at,
            entity_id: "entity",
        };
        prop_assert_eq!(compute_event_hash(&params).unwrap(), compute_event_hash(&params).unwrap());
    }

    #[test]
    fn prop_event_hash_binds_parent_and_type(
        parent in arb_hash256(),
        other_parent in arb_hash256(),
        event_type in arb_event_type(),
        payload in arb_payload(),
    ) {
        let created_at = base_time();
        let params = EventHashParams {
            parent_event_hash: &parent,
            event_type: &event_type,
            actor_hash: "actor",
            payload: &payload,
            created_at: &created_at,
            entity_id: "entity",
        };
        let hash = compute_event_hash(&params).unwrap();

        if other_parent != parent {
            let moved = EventHashParams { parent_event_hash: &other_parent, ..params };
            prop_assert_ne!(hash, compute_event_hash(&moved).unwrap());
        }

        let renamed_type = format!("{}X", event_type);
        let renamed = EventHashParams { event_type: &renamed_type, ..params };
        prop_assert_ne!(hash, compute_event_hash(&renamed).unwrap());
    }

    #[test]
    fn prop_canonical_hash_ignores_key_order(
        entries in prop::collection::btree_map("[a-z]{1,8}", arb_leaf(), 1..10),
    ) {
        let forward: serde_json::Map<String, Value> =
            entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let reversed: serde_json::Map<String, Value> =
            entries.iter().rev().map(|(k, v)| (k.clone(), v.clone())).collect();

        prop_assert_eq!(
            canonical_json_hash(&Value::Object(forward)).unwrap(),
            canonical_json_hash(&Value::Object(reversed)).unwrap()
        );
    }
}

// ============================================================================
// Chain Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_built_chain_verifies(payloads in prop::collection::vec(arb_payload(), 1..12)) {
        let events = build_chain("p-1", &payloads);
        prop_assert_eq!(events[0].parent_event_hash, GENESIS_HASH);

        let verification = verify_chain(&events);
        prop_assert!(verification.is_valid());
        prop_assert_eq!(verification.events_checked, events.len() as u64);
    }

    #[test]
    fn prop_tamper_reported_at_tampered_event(
        payloads in prop::collection::vec(arb_payload(), 2..12),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut events = build_chain("p-2", &payloads);
        let target = pick.index(events.len());

        events[target].payload = json!({ "tampered": events[target].payload.clone() });

        let verification = verify_chain(&events);
        let broken = verification.broken_at.expect("tamper must be detected");
        prop_assert_eq!(broken.sequence_number, target as u64 + 1);
        prop_assert_eq!(broken.reason, ChainBreakReason::HashMismatch);
    }

    #[test]
    fn prop_dropped_event_is_a_gap(
        payloads in prop::collection::vec(arb_payload(), 3..12),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut events = build_chain("p-3", &payloads);
        // Never drop the last event: a truncated tail is still a valid prefix
        let target = pick.index(events.len() - 1);
        events.remove(target);

        let broken = verify_chain(&events).broken_at.expect("gap must be detected");
        prop_assert_eq!(broken.sequence_number, target as u64 + 2);
        prop_assert_eq!(broken.reason, ChainBreakReason::SequenceGap);
    }
}

// ============================================================================
// Guard Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_clean_payloads_pass(payload in arb_payload()) {
        prop_assert!(!scan(&payload).found);
    }

    #[test]
    fn prop_email_found_at_any_depth(
        depth in 0usize..10,
        user in "[a-z]{1,10}",
        domain in "[a-z]{2,10}",
        filler in arb_clean_text(),
    ) {
        let email = format!("{}@{}.org", user, domain);
        let mut payload = json!({ "filler": filler, "contact": email.clone() });
        for _ in 0..depth {
            payload = json!({ "nested": [payload] });
        }

        let result = scan(&payload);
        prop_assert!(result.found);
        prop_assert!(result.sample.unwrap().contains(&email));
    }

    #[test]
    fn prop_ten_digit_runs_suspected(digits in "[0-9]{10}", prefix in "[a-z ]{0,10}") {
        let input = format!("{} {}", prefix, digits);
        prop_assert!(pii_suspected(&input));
    }
}

// ============================================================================
// Evidence Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_sanitized_names_are_safe(name in ".{0,80}") {
        let safe = sanitize_file_name(&name);
        prop_assert!(!safe.is_empty());
        prop_assert!(safe
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'));
    }

    #[test]
    fn prop_storage_path_has_three_segments(
        name in ".{0,80}",
        millis in 0i64..4_102_444_800_000,
        sha in "[a-f0-9]{64}",
    ) {
        let pid = ProcessId::new();
        let path = storage_path(&pid, EvidenceCategory::Document, millis, &sha, &name);
        let segments: Vec<&str> = path.split('/').collect();
        prop_assert_eq!(segments.len(), 3);
        prop_assert_eq!(segments[0], pid.to_string());
        prop_assert_eq!(segments[1], "pdf");
        let expected_prefix = format!("{}_{}_", millis, &sha[..12]);
        prop_assert!(segments[2].starts_with(&expected_prefix));
    }

    #[test]
    fn prop_size_ceiling_is_inclusive(
        mime in prop::sample::select(ALLOWED_MIME_TYPES),
        below in 0u64..1024,
    ) {
        let category = EvidenceCategory::for_mime(mime).unwrap();
        let max = category.max_bytes();

        prop_assert_eq!(admit(mime, max - below), Ok(category));
        prop_assert_eq!(
            admit(mime, max + 1 + below),
            Err(PolicyViolation::TooLarge {
                size_bytes: max + 1 + below,
                max_bytes: max,
                mime_type: mime.to_string(),
            })
        );
    }
}
