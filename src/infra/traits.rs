//! Trait definitions for the civic ledger's collaborators and service surface

use async_trait::async_trait;
use chrono::Utc;
#[cfg(test)]
use mockall::automock;

use crate::domain::{
    ChainHead, ChainVerification, EntityType, EventDraft, EvidenceId, EvidencePointer, EvidenceReceipt,
    EvidenceUpload, LedgerEvent, ProcessCreated, ProcessEntity, ProcessId,
};

use super::Result;

/// Durable storage for processes, chained events and evidence pointers.
///
/// Invariant: an event is only ever persisted on top of the head it was built
/// against. Implementations must make the head check and the insert atomic.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a process together with its genesis event, atomically
    async fn create_process(&self, process: &ProcessEntity, genesis: &LedgerEvent) -> Result<()>;

    /// Get a process by ID
    async fn get_process(&self, process_id: &ProcessId) -> Result<Option<ProcessEntity>>;

    /// Read the current chain head for an entity
    async fn chain_head(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Option<ChainHead>>;

    /// Append an event if the entity's head still equals `expected_head`.
    ///
    /// Returns `LedgerError::HeadConflict` when the head has moved.
    async fn append_event(
        &self,
        event: &LedgerEvent,
        expected_head: Option<ChainHead>,
    ) -> Result<()>;

    /// Link `draft` onto the entity's current head and persist it.
    ///
    /// Stores that can hold the head across the build override this so that
    /// concurrent writers queue instead of conflicting. The default reads the
    /// head, then appends with the optimistic check, so it may still return
    /// `LedgerError::HeadConflict`.
    async fn append_next(&self, draft: &EventDraft) -> Result<LedgerEvent> {
        let head = self.chain_head(&draft.entity_type, &draft.entity_id).await?;
        let event = draft.link(head.as_ref(), Utc::now())?;
        self.append_event(&event, head).await?;
        Ok(event)
    }

    /// Read all events for an entity, ascending by sequence number
    async fn read_entity(&self, entity_type: &EntityType, entity_id: &str)
        -> Result<Vec<LedgerEvent>>;

    /// Record an evidence pointer
    async fn insert_evidence(&self, pointer: &EvidencePointer) -> Result<()>;

    /// Get an evidence pointer by ID
    async fn get_evidence(&self, evidence_id: &EvidenceId) -> Result<Option<EvidencePointer>>;
}

/// Write-once object storage for raw evidence bytes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes at `path`. Never overwrites: an existing object is
    /// `LedgerError::EvidencePathConflict`.
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// Fetch the bytes stored at `path`
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Check whether an object exists at `path`
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Operations exposed to callers of the ledger.
///
/// Invariant: nothing reaches a ledger without passing the PII guard.
#[async_trait]
pub trait ProcessLedger: Send + Sync {
    /// Create a process and its genesis `ProcessCreated` event
    async fn create_process(&self, process_type: &str, actor_hash: &str)
        -> Result<ProcessCreated>;

    /// Append a guarded event to a process's chain
    async fn append_event(
        &self,
        process_id: &ProcessId,
        event_type: &str,
        actor_hash: &str,
        payload: serde_json::Value,
    ) -> Result<LedgerEvent>;

    /// All events of a process, ascending by sequence number
    async fn list_events(&self, process_id: &ProcessId) -> Result<Vec<LedgerEvent>>;

    /// Replay a process's chain and report the first break, if any
    async fn verify_integrity(&self, process_id: &ProcessId) -> Result<ChainVerification>;

    /// Validate, store and chain a piece of evidence
    async fn submit_evidence(
        &self,
        process_id: &ProcessId,
        actor_hash: &str,
        upload: EvidenceUpload,
    ) -> Result<EvidenceReceipt>;

    /// Get a process by ID
    async fn get_process(&self, process_id: &ProcessId) -> Result<Option<ProcessEntity>>;

    /// Get an evidence pointer by ID
    async fn get_evidence(&self, evidence_id: &EvidenceId) -> Result<Option<EvidencePointer>>;
}
