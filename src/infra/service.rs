//! Process/event service
//!
//! Orchestrates the admission guards, the evidence policy and chained appends
//! on top of a [`LedgerStore`] and a [`BlobStore`]. This is the only place
//! that constructs ledger events and evidence pointers.
//!
//! # Append protocol
//!
//! 1. Hand the store an [`EventDraft`]
//! 2. The store links it onto the entity's current head and persists it only
//!    if that head is still current
//! 3. On `HeadConflict`, start over from step 1 after a short backoff
//!
//! # Evidence protocol
//!
//! upload blob → insert pointer → append `EvidenceSubmitted`, each step gated
//! on the previous one. A failure after the upload leaves an orphaned blob,
//! which is logged and surfaced as the error; the pointer is never recorded
//! without its blob.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::crypto::sha256_hex;
use crate::domain::{
    admit, normalize_mime, storage_path, truncate_to_micros, verify_chain, ChainVerification,
    EntityType, EventDraft, EventType, EvidenceId, EvidencePointer, EvidenceReceipt, EvidenceUpload,
    LedgerEvent, ProcessCreated, ProcessEntity, ProcessId, DEFAULT_FILE_NAME, MAX_ACTOR_HASH_LEN,
    MAX_EVENT_TYPE_LEN, MAX_PROCESS_TYPE_LEN,
};
use crate::guard::{json_depth, pii_suspected, scan};
use crate::infra::retry::{Retry, RetryConfig};
use crate::infra::{BlobStore, LedgerError, LedgerStore, ProcessLedger, Result};

/// Deepest payload nesting accepted on append
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// Ledger service over a store and a blob backend
pub struct LedgerService<S, B> {
    store: S,
    blobs: B,
    storage_bucket: String,
    retry: Retry,
}

impl<S, B> LedgerService<S, B>
where
    S: LedgerStore,
    B: BlobStore,
{
    pub fn new(store: S, blobs: B, storage_bucket: impl Into<String>) -> Self {
        Self {
            store,
            blobs,
            storage_bucket: storage_bucket.into(),
            retry: Retry::new(RetryConfig::default()),
        }
    }

    /// Override the head-conflict retry policy
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = Retry::new(config);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn storage_bucket(&self) -> &str {
        &self.storage_bucket
    }

    async fn require_process(&self, process_id: &ProcessId) -> Result<ProcessEntity> {
        self.store
            .get_process(process_id)
            .await?
            .ok_or(LedgerError::ProcessNotFound(*process_id))
    }

    /// Build and persist the next event of an entity's chain, retrying when
    /// another writer moved the head first
    async fn append_chained(
        &self,
        entity_type: EntityType,
        entity_id: String,
        event_type: EventType,
        actor_hash: &str,
        payload: Value,
    ) -> Result<LedgerEvent> {
        let draft = EventDraft {
            entity_type,
            entity_id,
            event_type,
            actor_hash: actor_hash.to_string(),
            payload,
        };
        let store = &self.store;
        let draft = &draft;

        self.retry
            .run_with_predicate(
                "append_event",
                move || store.append_next(draft),
                |e: &LedgerError| matches!(e, LedgerError::HeadConflict { .. }),
            )
            .await
    }
}

fn normalize_actor_hash(actor_hash: &str) -> Result<&str> {
    let actor_hash = actor_hash.trim();
    if actor_hash.is_empty() {
        return Err(LedgerError::validation("actor_hash is required"));
    }
    if actor_hash.chars().count() > MAX_ACTOR_HASH_LEN {
        return Err(LedgerError::validation(format!(
            "actor_hash exceeds {} characters",
            MAX_ACTOR_HASH_LEN
        )));
    }
    Ok(actor_hash)
}

fn normalize_process_type(process_type: &str) -> Result<&str> {
    let process_type = process_type.trim();
    if process_type.is_empty() {
        return Err(LedgerError::validation("process_type is required"));
    }
    if process_type.chars().count() > MAX_PROCESS_TYPE_LEN {
        return Err(LedgerError::validation(format!(
            "process_type exceeds {} characters",
            MAX_PROCESS_TYPE_LEN
        )));
    }
    guard_field("process_type", process_type)?;
    Ok(process_type)
}

fn normalize_event_type(event_type: &str) -> Result<EventType> {
    let event_type = event_type.trim();
    if event_type.is_empty() {
        return Err(LedgerError::validation("event_type is required"));
    }
    if event_type.chars().count() > MAX_EVENT_TYPE_LEN {
        return Err(LedgerError::validation(format!(
            "event_type exceeds {} characters",
            MAX_EVENT_TYPE_LEN
        )));
    }
    let event_type = EventType::new(event_type);
    if event_type.is_reserved() {
        return Err(LedgerError::validation(format!(
            "event_type {} is written by the ledger only",
            event_type
        )));
    }
    guard_field("event_type", event_type.as_str())?;
    Ok(event_type)
}

/// Fast-path guard for a single known-sensitive field
fn guard_field(field: &str, text: &str) -> Result<()> {
    if pii_suspected(text) {
        return Err(LedgerError::PiiDetected {
            field: field.to_string(),
            sample: text.trim().chars().take(crate::guard::SAMPLE_MAX_CHARS).collect(),
        });
    }
    Ok(())
}

/// Admit a caller payload: shape checks, then the note fast path, then the
/// full recursive scan
fn admit_payload(event_type: &EventType, payload: Value) -> Result<Value> {
    let payload = match payload {
        Value::Null => json!({}),
        other => other,
    };

    if json_depth(&payload) > MAX_PAYLOAD_DEPTH {
        return Err(LedgerError::validation(format!(
            "payload nesting exceeds {} levels",
            MAX_PAYLOAD_DEPTH
        )));
    }

    if event_type.as_str() == EventType::CITIZEN_NOTE_ADDED {
        let note = payload
            .get("note")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if note.is_empty() {
            return Err(LedgerError::validation(
                "CitizenNoteAdded requires a non-empty note",
            ));
        }
        guard_field("note", note)?;
    }

    let found = scan(&payload);
    if found.found {
        return Err(LedgerError::PiiDetected {
            field: "payload".to_string(),
            sample: found.sample.unwrap_or_default(),
        });
    }

    Ok(payload)
}

#[async_trait]
impl<S, B> ProcessLedger for LedgerService<S, B>
where
    S: LedgerStore,
    B: BlobStore,
{
    #[instrument(skip(self, process_type, actor_hash))]
    async fn create_process(&self, process_type: &str, actor_hash: &str) -> Result<ProcessCreated> {
        let process_type = normalize_process_type(process_type)?;
        let actor_hash = normalize_actor_hash(actor_hash)?;

        let process_id = ProcessId::new();
        let genesis = LedgerEvent::next(
            None,
            EntityType::process(),
            process_id.entity_id(),
            EventType::from(EventType::PROCESS_CREATED),
            actor_hash,
            json!({ "process_type": process_type }),
            Utc::now(),
        )?;
        let process = ProcessEntity {
            process_id,
            process_type: process_type.to_string(),
            created_at: genesis.created_at,
        };

        self.store.create_process(&process, &genesis).await?;

        info!(
            process_id = %process_id,
            genesis_hash = %genesis.current_event_hash_hex(),
            "Process created"
        );

        Ok(ProcessCreated {
            process,
            genesis_event: genesis,
        })
    }

    #[instrument(skip(self, actor_hash, payload), fields(process_id = %process_id))]
    async fn append_event(
        &self,
        process_id: &ProcessId,
        event_type: &str,
        actor_hash: &str,
        payload: Value,
    ) -> Result<LedgerEvent> {
        let event_type = normalize_event_type(event_type)?;
        let actor_hash = normalize_actor_hash(actor_hash)?;
        let payload = admit_payload(&event_type, payload)?;

        self.require_process(process_id).await?;

        let event = self
            .append_chained(
                EntityType::process(),
                process_id.entity_id(),
                event_type,
                actor_hash,
                payload,
            )
            .await?;

        info!(
            event_type = %event.event_type,
            sequence = event.sequence_number,
            "Event appended"
        );
        Ok(event)
    }

    async fn list_events(&self, process_id: &ProcessId) -> Result<Vec<LedgerEvent>> {
        self.require_process(process_id).await?;
        self.store
            .read_entity(&EntityType::process(), &process_id.entity_id())
            .await
    }

    #[instrument(skip(self), fields(process_id = %process_id))]
    async fn verify_integrity(&self, process_id: &ProcessId) -> Result<ChainVerification> {
        let events = self.list_events(process_id).await?;
        let verification = verify_chain(&events);

        match &verification.broken_at {
            None => info!(events = verification.events_checked, "Chain verified"),
            Some(broken) => warn!(
                event_id = %broken.event_id,
                sequence = broken.sequence_number,
                reason = %broken.reason,
                "Chain integrity violation"
            ),
        }

        Ok(verification)
    }

    #[instrument(
        skip(self, actor_hash, upload),
        fields(process_id = %process_id, size = upload.bytes.len())
    )]
    async fn submit_evidence(
        &self,
        process_id: &ProcessId,
        actor_hash: &str,
        upload: EvidenceUpload,
    ) -> Result<EvidenceReceipt> {
        let actor_hash = normalize_actor_hash(actor_hash)?;
        let mime_type = normalize_mime(&upload.declared_mime);
        let size_bytes = upload.size_bytes();
        let category = admit(&mime_type, size_bytes)?;
        // Camera and messenger names are digit runs the phone pattern flags
        let declared_name = if pii_suspected(&upload.declared_name) {
            DEFAULT_FILE_NAME
        } else {
            upload.declared_name.as_str()
        };

        self.require_process(process_id).await?;

        let sha256 = sha256_hex(&upload.bytes);
        let now = Utc::now();
        let path = storage_path(
            process_id,
            category,
            now.timestamp_millis(),
            &sha256,
            declared_name,
        );

        self.blobs.put(&path, &upload.bytes, &mime_type).await?;

        let pointer = EvidencePointer {
            evidence_id: EvidenceId::new(),
            process_id: *process_id,
            actor_hash: actor_hash.to_string(),
            storage_bucket: self.storage_bucket.clone(),
            storage_path: path,
            sha256,
            mime_type,
            size_bytes,
            created_at: truncate_to_micros(now),
        };

        if let Err(e) = self.store.insert_evidence(&pointer).await {
            warn!(
                storage_path = %pointer.storage_path,
                error = %e,
                "Evidence pointer not recorded, blob is orphaned"
            );
            return Err(e);
        }

        let event = match self
            .append_chained(
                EntityType::process(),
                process_id.entity_id(),
                EventType::from(EventType::EVIDENCE_SUBMITTED),
                actor_hash,
                pointer.event_payload(),
            )
            .await
        {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    evidence_id = %pointer.evidence_id,
                    error = %e,
                    "EvidenceSubmitted not chained, pointer has no ledger event"
                );
                return Err(e);
            }
        };

        info!(
            evidence_id = %pointer.evidence_id,
            sha256 = %pointer.sha256,
            sequence = event.sequence_number,
            "Evidence submitted"
        );

        Ok(EvidenceReceipt {
            evidence_id: pointer.evidence_id,
            sha256: pointer.sha256,
            storage_bucket: pointer.storage_bucket,
            storage_path: pointer.storage_path,
            event,
        })
    }

    async fn get_process(&self, process_id: &ProcessId) -> Result<Option<ProcessEntity>> {
        self.store.get_process(process_id).await
    }

    async fn get_evidence(&self, evidence_id: &EvidenceId) -> Result<Option<EvidencePointer>> {
        self.store.get_evidence(evidence_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChainHead, EVIDENCE_RAW_NOTE};
    use crate::infra::{MockBlobStore, MockLedgerStore};

    fn known_process(process_id: ProcessId) -> ProcessEntity {
        ProcessEntity {
            process_id,
            process_type: "permit".to_string(),
            created_at: Utc::now(),
        }
    }

    fn genesis_head() -> ChainHead {
        ChainHead {
            sequence: 1,
            event_hash: [3u8; 32],
            created_at: truncate_to_micros(Utc::now()),
        }
    }

    fn service(
        store: MockLedgerStore,
        blobs: MockBlobStore,
    ) -> LedgerService<MockLedgerStore, MockBlobStore> {
        LedgerService::new(store, blobs, "evidence").with_retry_config(RetryConfig::immediate(3))
    }

    #[tokio::test]
    async fn test_pii_payload_never_reaches_store() {
        // No expectations: any store call panics
        let svc = service(MockLedgerStore::new(), MockBlobStore::new());

        let err = svc
            .append_event(
                &ProcessId::new(),
                "StatusChanged",
                "actor-1",
                json!({"details": {"contact": ["call 55 1234 5678"]}}),
            )
            .await
            .unwrap_err();

        match err {
            LedgerError::PiiDetected { field, sample } => {
                assert_eq!(field, "payload");
                assert_eq!(sample, "call 55 1234 5678");
            }
            other => panic!("expected PiiDetected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_citizen_note_requires_note() {
        let svc = service(MockLedgerStore::new(), MockBlobStore::new());

        let err = svc
            .append_event(&ProcessId::new(), "CitizenNoteAdded", "actor-1", json!({"note": "  "}))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let err = svc
            .append_event(
                &ProcessId::new(),
                "CitizenNoteAdded",
                "actor-1",
                json!({"note": "mail me: vecino@correo.mx"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PiiDetected { ref field, .. } if field == "note"));
    }

    #[tokio::test]
    async fn test_reserved_and_invalid_event_types_rejected() {
        let svc = service(MockLedgerStore::new(), MockBlobStore::new());
        let pid = ProcessId::new();

        let too_long = "x".repeat(65);
        for event_type in ["ProcessCreated", "EvidenceSubmitted", "", too_long.as_str()] {
            let err = svc
                .append_event(&pid, event_type, "actor-1", json!({}))
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)), "{}", event_type);
        }
    }

    #[tokio::test]
    async fn test_missing_actor_rejected() {
        let svc = service(MockLedgerStore::new(), MockBlobStore::new());
        let err = svc.create_process("permit", "   ").await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_deep_payload_rejected() {
        let svc = service(MockLedgerStore::new(), MockBlobStore::new());
        let mut payload = json!("leaf");
        for _ in 0..(MAX_PAYLOAD_DEPTH + 1) {
            payload = json!({ "n": payload });
        }
        let err = svc
            .append_event(&ProcessId::new(), "StatusChanged", "actor-1", payload)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_process_not_found() {
        let mut store = MockLedgerStore::new();
        store.expect_get_process().returning(|_| Ok(None));
        let svc = service(store, MockBlobStore::new());

        let pid = ProcessId::new();
        let err = svc
            .append_event(&pid, "StatusChanged", "actor-1", json!({"status": "open"}))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ProcessNotFound(id) if id == pid));
    }

    #[tokio::test]
    async fn test_head_conflict_rebuilds_and_retries() {
        let pid = ProcessId::new();

        let mut store = MockLedgerStore::new();
        store
            .expect_get_process()
            .returning(move |_| Ok(Some(known_process(pid))));
        let mut calls = 0;
        store.expect_append_next().times(2).returning(move |draft| {
            assert_eq!(draft.entity_id, pid.entity_id());
            assert_eq!(draft.payload, json!({}));
            calls += 1;
            if calls == 1 {
                Err(LedgerError::HeadConflict {
                    entity_type: "process".to_string(),
                    entity_id: draft.entity_id.clone(),
                })
            } else {
                Ok(draft.link(Some(&genesis_head()), Utc::now()).unwrap())
            }
        });

        let svc = service(store, MockBlobStore::new());
        let event = svc
            .append_event(&pid, "StatusChanged", "actor-1", Value::Null)
            .await
            .unwrap();

        assert_eq!(event.sequence_number, 2);
        assert_eq!(event.payload, json!({}));
    }

    #[tokio::test]
    async fn test_head_conflict_gives_up_after_retries() {
        let pid = ProcessId::new();

        let mut store = MockLedgerStore::new();
        store
            .expect_get_process()
            .returning(move |_| Ok(Some(known_process(pid))));
        store.expect_append_next().times(4).returning(|draft| {
            Err(LedgerError::HeadConflict {
                entity_type: "process".to_string(),
                entity_id: draft.entity_id.clone(),
            })
        });

        let svc = service(store, MockBlobStore::new());
        let err = svc
            .append_event(&pid, "StatusChanged", "actor-1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::HeadConflict { .. }));
    }

    #[tokio::test]
    async fn test_other_store_errors_not_retried() {
        let pid = ProcessId::new();

        let mut store = MockLedgerStore::new();
        store
            .expect_get_process()
            .returning(move |_| Ok(Some(known_process(pid))));
        store
            .expect_append_next()
            .times(1)
            .returning(|_| Err(LedgerError::Storage("connection reset".to_string())));

        let svc = service(store, MockBlobStore::new());
        let err = svc
            .append_event(&pid, "StatusChanged", "actor-1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
    }

    #[tokio::test]
    async fn test_failed_upload_records_nothing() {
        let pid = ProcessId::new();

        let mut store = MockLedgerStore::new();
        store
            .expect_get_process()
            .returning(move |_| Ok(Some(known_process(pid))));
        // insert_evidence and append_next have no expectations

        let mut blobs = MockBlobStore::new();
        blobs
            .expect_put()
            .times(1)
            .returning(|_, _, _| Err(LedgerError::Storage("disk full".to_string())));

        let svc = service(store, blobs);
        let err = svc
            .submit_evidence(&pid, "actor-1", EvidenceUpload::new(vec![1u8; 16], "image/png", "a.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
    }

    #[tokio::test]
    async fn test_evidence_policy_checked_before_storage() {
        let svc = service(MockLedgerStore::new(), MockBlobStore::new());
        let pid = ProcessId::new();

        let err = svc
            .submit_evidence(&pid, "actor-1", EvidenceUpload::new(vec![1u8; 4], "text/html", "x.html"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::FileTypeNotAllowed { ref mime_type } if mime_type == "text/html"));

        let err = svc
            .submit_evidence(&pid, "actor-1", EvidenceUpload::new(Vec::new(), "image/png", "a.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_suspect_file_name_replaced_in_storage_path() {
        let pid = ProcessId::new();

        let mut store = MockLedgerStore::new();
        store
            .expect_get_process()
            .returning(move |_| Ok(Some(known_process(pid))));
        store.expect_insert_evidence().times(1).returning(|_| Ok(()));
        store
            .expect_append_next()
            .times(1)
            .returning(|draft| Ok(draft.link(Some(&genesis_head()), Utc::now()).unwrap()));

        let mut blobs = MockBlobStore::new();
        blobs
            .expect_put()
            .withf(|path, _, _| path.ends_with("_evidence") && !path.contains("maria"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let svc = service(store, blobs);
        let receipt = svc
            .submit_evidence(
                &pid,
                "actor-1",
                EvidenceUpload::new(vec![1u8; 4], "image/png", "maria@example.com.png"),
            )
            .await
            .unwrap();

        assert!(receipt.storage_path.ends_with("_evidence"));
        assert_eq!(receipt.event.payload["storage_path"], json!(receipt.storage_path));
        assert_eq!(receipt.event.payload["note"], json!(EVIDENCE_RAW_NOTE));
    }
}
