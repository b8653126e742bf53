//! PostgreSQL ledger store
//!
//! # Atomicity
//!
//! Appends lock the entity's `chain_heads` row and build the event on the
//! locked head:
//! ```sql
//! BEGIN;
//! SELECT head_sequence, head_hash, head_created_at FROM chain_heads
//!     WHERE entity_type = $1 AND entity_id = $2 FOR UPDATE;
//! -- link the draft onto that head, advance the head, insert the event
//! COMMIT;
//! ```
//!
//! Concurrent writers to the same process queue on that row lock, so each one
//! sees the head its predecessor committed. `append_event` keeps the
//! optimistic form for callers that built an event themselves: a stale head
//! gets `HeadConflict`.
//! Unique indexes on `(entity_type, entity_id, sequence_number)` and
//! `(entity_type, entity_id, parent_event_hash)` back this up at the storage
//! level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use crate::crypto::canonicalize_json;
use crate::domain::{
    hash256_from_hex, ChainHead, EntityType, EventDraft, EventType, EvidenceId, EvidencePointer, LedgerEvent,
    ProcessEntity, ProcessId,
};
use crate::infra::{LedgerError, LedgerStore, Result};

/// PostgreSQL-backed ledger store
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Create a new PostgreSQL ledger store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply migrations
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize the database schema
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_postgres(&self.pool)
            .await
            .map_err(|e| LedgerError::Configuration(format!("postgres migration failed: {}", e)))
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_chain_head(
        tx: &mut Transaction<'_, Postgres>,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Option<ChainHead>> {
        let row: Option<(i64, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT head_sequence, head_hash, head_created_at
            FROM chain_heads
            WHERE entity_type = $1 AND entity_id = $2
            FOR UPDATE
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(head_from_row).transpose()
    }

    async fn advance_head(tx: &mut Transaction<'_, Postgres>, event: &LedgerEvent) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE chain_heads
            SET head_sequence = $3,
                head_hash = $4,
                head_created_at = $5,
                updated_at = NOW()
            WHERE entity_type = $1 AND entity_id = $2
            "#,
        )
        .bind(event.entity_type.as_str())
        .bind(&event.entity_id)
        .bind(event.sequence_number as i64)
        .bind(event.current_event_hash_hex())
        .bind(event.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn insert_event(tx: &mut Transaction<'_, Postgres>, event: &LedgerEvent) -> Result<()> {
        let payload = canonicalize_json(&event.payload)?;

        sqlx::query(
            r#"
            INSERT INTO ledger_events (
                event_id, entity_type, entity_id, sequence_number,
                event_type, actor_hash, payload,
                parent_event_hash, current_event_hash, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.event_id)
        .bind(event.entity_type.as_str())
        .bind(&event.entity_id)
        .bind(event.sequence_number as i64)
        .bind(event.event_type.as_str())
        .bind(&event.actor_hash)
        .bind(&payload)
        .bind(event.parent_event_hash_hex())
        .bind(event.current_event_hash_hex())
        .bind(event.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => LedgerError::HeadConflict {
                entity_type: event.entity_type.to_string(),
                entity_id: event.entity_id.clone(),
            },
            _ => LedgerError::Database(e),
        })?;

        Ok(())
    }

    async fn insert_head(tx: &mut Transaction<'_, Postgres>, event: &LedgerEvent) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO chain_heads (entity_type, entity_id, head_sequence, head_hash, head_created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (entity_type, entity_id) DO NOTHING
            "#,
        )
        .bind(event.entity_type.as_str())
        .bind(&event.entity_id)
        .bind(event.sequence_number as i64)
        .bind(event.current_event_hash_hex())
        .bind(event.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    fn conflict(event: &LedgerEvent) -> LedgerError {
        LedgerError::HeadConflict {
            entity_type: event.entity_type.to_string(),
            entity_id: event.entity_id.clone(),
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    #[instrument(skip(self, process, genesis), fields(process_id = %process.process_id))]
    async fn create_process(&self, process: &ProcessEntity, genesis: &LedgerEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO processes (process_id, process_type, created_at) VALUES ($1, $2, $3)",
        )
        .bind(process.process_id.0)
        .bind(&process.process_type)
        .bind(process.created_at)
        .execute(&mut *tx)
        .await?;

        if Self::insert_head(&mut tx, genesis).await? == 0 {
            return Err(Self::conflict(genesis));
        }

        Self::insert_event(&mut tx, genesis).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_process(&self, process_id: &ProcessId) -> Result<Option<ProcessEntity>> {
        let row: Option<(Uuid, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT process_id, process_type, created_at FROM processes WHERE process_id = $1",
        )
        .bind(process_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, process_type, created_at)| ProcessEntity {
            process_id: ProcessId::from_uuid(id),
            process_type,
            created_at,
        }))
    }

    async fn chain_head(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Option<ChainHead>> {
        let row: Option<(i64, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT head_sequence, head_hash, head_created_at
            FROM chain_heads
            WHERE entity_type = $1 AND entity_id = $2
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(head_from_row).transpose()
    }

    #[instrument(skip(self, event, expected_head), fields(entity_id = %event.entity_id, sequence = event.sequence_number))]
    async fn append_event(
        &self,
        event: &LedgerEvent,
        expected_head: Option<ChainHead>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current = Self::lock_chain_head(&mut tx, &event.entity_type, &event.entity_id).await?;

        match (expected_head, current) {
            (None, None) => {
                if Self::insert_head(&mut tx, event).await? == 0 {
                    return Err(Self::conflict(event));
                }
            }
            (Some(expected), Some(current))
                if current.sequence == expected.sequence
                    && current.event_hash == expected.event_hash =>
            {
                Self::advance_head(&mut tx, event).await?;
            }
            _ => return Err(Self::conflict(event)),
        }

        Self::insert_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, draft), fields(entity_id = %draft.entity_id, event_type = %draft.event_type))]
    async fn append_next(&self, draft: &EventDraft) -> Result<LedgerEvent> {
        let mut tx = self.pool.begin().await?;

        let head = Self::lock_chain_head(&mut tx, &draft.entity_type, &draft.entity_id).await?;
        let event = draft.link(head.as_ref(), Utc::now())?;

        match head {
            Some(_) => Self::advance_head(&mut tx, &event).await?,
            // No row to lock yet: a racing first writer loses on the insert
            None => {
                if Self::insert_head(&mut tx, &event).await? == 0 {
                    return Err(Self::conflict(&event));
                }
            }
        }

        Self::insert_event(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(event)
    }

    async fn read_entity(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Vec<LedgerEvent>> {
        let rows = sqlx::query_as::<_, LedgerEventRow>(
            r#"
            SELECT event_id, entity_type, entity_id, sequence_number,
                   event_type, actor_hash, payload,
                   parent_event_hash, current_event_hash, created_at
            FROM ledger_events
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEvent::try_from).collect()
    }

    #[instrument(skip(self, pointer), fields(evidence_id = %pointer.evidence_id))]
    async fn insert_evidence(&self, pointer: &EvidencePointer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO evidence_pointers (
                evidence_id, process_id, actor_hash,
                storage_bucket, storage_path, sha256,
                mime_type, size_bytes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(pointer.evidence_id.0)
        .bind(pointer.process_id.0)
        .bind(&pointer.actor_hash)
        .bind(&pointer.storage_bucket)
        .bind(&pointer.storage_path)
        .bind(&pointer.sha256)
        .bind(&pointer.mime_type)
        .bind(pointer.size_bytes as i64)
        .bind(pointer.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                LedgerError::EvidencePathConflict(pointer.storage_path.clone())
            }
            _ => LedgerError::Database(e),
        })?;

        Ok(())
    }

    async fn get_evidence(&self, evidence_id: &EvidenceId) -> Result<Option<EvidencePointer>> {
        let row = sqlx::query_as::<_, EvidenceRow>(
            r#"
            SELECT evidence_id, process_id, actor_hash,
                   storage_bucket, storage_path, sha256,
                   mime_type, size_bytes, created_at
            FROM evidence_pointers
            WHERE evidence_id = $1
            "#,
        )
        .bind(evidence_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EvidencePointer::from))
    }
}

fn head_from_row((sequence, hash, created_at): (i64, String, DateTime<Utc>)) -> Result<ChainHead> {
    Ok(ChainHead {
        sequence: sequence as u64,
        event_hash: hash256_from_hex(hash.trim())
            .ok_or_else(|| LedgerError::Internal("Invalid head_hash".to_string()))?,
        created_at,
    })
}

#[derive(Debug, FromRow)]
struct LedgerEventRow {
    event_id: Uuid,
    entity_type: String,
    entity_id: String,
    sequence_number: i64,
    event_type: String,
    actor_hash: String,
    payload: String,
    parent_event_hash: String,
    current_event_hash: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerEventRow> for LedgerEvent {
    type Error = LedgerError;

    fn try_from(row: LedgerEventRow) -> Result<Self> {
        let payload: serde_json::Value = serde_json::from_str(&row.payload)
            .map_err(|e| LedgerError::Internal(format!("Invalid payload JSON: {}", e)))?;
        let parent_event_hash = hash256_from_hex(row.parent_event_hash.trim())
            .ok_or_else(|| LedgerError::Internal("Invalid parent_event_hash".to_string()))?;
        let current_event_hash = hash256_from_hex(row.current_event_hash.trim())
            .ok_or_else(|| LedgerError::Internal("Invalid current_event_hash".to_string()))?;

        Ok(LedgerEvent {
            event_id: row.event_id,
            sequence_number: row.sequence_number as u64,
            entity_type: EntityType::from(row.entity_type),
            entity_id: row.entity_id,
            event_type: EventType::from(row.event_type),
            actor_hash: row.actor_hash,
            payload,
            parent_event_hash,
            current_event_hash,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EvidenceRow {
    evidence_id: Uuid,
    process_id: Uuid,
    actor_hash: String,
    storage_bucket: String,
    storage_path: String,
    sha256: String,
    mime_type: String,
    size_bytes: i64,
    created_at: DateTime<Utc>,
}

impl From<EvidenceRow> for EvidencePointer {
    fn from(row: EvidenceRow) -> Self {
        EvidencePointer {
            evidence_id: EvidenceId::from_uuid(row.evidence_id),
            process_id: ProcessId::from_uuid(row.process_id),
            actor_hash: row.actor_hash,
            storage_bucket: row.storage_bucket,
            storage_path: row.storage_path,
            sha256: row.sha256.trim().to_string(),
            mime_type: row.mime_type,
            size_bytes: row.size_bytes as u64,
            created_at: row.created_at,
        }
    }
}
