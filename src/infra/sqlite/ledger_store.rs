//! SQLite ledger store
//!
//! Embedded persistence for processes, chains and evidence pointers. Appends
//! advance the `chain_heads` row with a conditional update inside the same
//! transaction that inserts the event, so a stale head can never be extended.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, Transaction};
use tracing::instrument;
use uuid::Uuid;

use crate::crypto::{canonical_timestamp, canonicalize_json};
use crate::domain::{
    hash256_from_hex, ChainHead, EntityType, EventType, EvidenceId, EvidencePointer, LedgerEvent,
    ProcessEntity, ProcessId,
};
use crate::infra::{LedgerError, LedgerStore, Result};

/// SQLite-backed ledger store
#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a database URL and apply migrations
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    /// Open a private in-memory database.
    ///
    /// Every SQLite `:memory:` connection is a separate database, so the pool
    /// holds exactly one connection and never recycles it.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize the database schema
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_sqlite(&self.pool)
            .await
            .map_err(|e| LedgerError::Configuration(format!("sqlite migration failed: {}", e)))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_event(tx: &mut Transaction<'_, Sqlite>, event: &LedgerEvent) -> Result<()> {
        let payload = canonicalize_json(&event.payload)?;

        sqlx::query(
            r#"
            INSERT INTO ledger_events (
                event_id, entity_type, entity_id, sequence_number,
                event_type, actor_hash, payload,
                parent_event_hash, current_event_hash, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.event_id.to_string())
        .bind(event.entity_type.as_str())
        .bind(&event.entity_id)
        .bind(event.sequence_number as i64)
        .bind(event.event_type.as_str())
        .bind(&event.actor_hash)
        .bind(&payload)
        .bind(event.parent_event_hash_hex())
        .bind(event.current_event_hash_hex())
        .bind(canonical_timestamp(&event.created_at))
        .execute(&mut **tx)
        .await
        .map_err(|e| fork_as_conflict(e, event))?;

        Ok(())
    }
}

/// A unique-index violation on insert means another writer took this position
fn fork_as_conflict(err: sqlx::Error, event: &LedgerEvent) -> LedgerError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => LedgerError::HeadConflict {
            entity_type: event.entity_type.to_string(),
            entity_id: event.entity_id.clone(),
        },
        _ => LedgerError::Database(err),
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    #[instrument(skip(self, process, genesis), fields(process_id = %process.process_id))]
    async fn create_process(&self, process: &ProcessEntity, genesis: &LedgerEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO processes (process_id, process_type, created_at) VALUES (?, ?, ?)")
            .bind(process.process_id.entity_id())
            .bind(&process.process_type)
            .bind(canonical_timestamp(&process.created_at))
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO chain_heads (entity_type, entity_id, head_sequence, head_hash, head_created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (entity_type, entity_id) DO NOTHING
            "#,
        )
        .bind(genesis.entity_type.as_str())
        .bind(&genesis.entity_id)
        .bind(genesis.sequence_number as i64)
        .bind(genesis.current_event_hash_hex())
        .bind(canonical_timestamp(&genesis.created_at))
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(LedgerError::HeadConflict {
                entity_type: genesis.entity_type.to_string(),
                entity_id: genesis.entity_id.clone(),
            });
        }

        Self::insert_event(&mut tx, genesis).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_process(&self, process_id: &ProcessId) -> Result<Option<ProcessEntity>> {
        let row = sqlx::query_as::<_, ProcessRow>(
            "SELECT process_id, process_type, created_at FROM processes WHERE process_id = ?",
        )
        .bind(process_id.entity_id())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProcessEntity::try_from).transpose()
    }

    async fn chain_head(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Option<ChainHead>> {
        let row = sqlx::query_as::<_, ChainHeadRow>(
            r#"
            SELECT head_sequence, head_hash, head_created_at
            FROM chain_heads
            WHERE entity_type = ? AND entity_id = ?
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChainHead::try_from).transpose()
    }

    #[instrument(skip(self, event, expected_head), fields(entity_id = %event.entity_id, sequence = event.sequence_number))]
    async fn append_event(
        &self,
        event: &LedgerEvent,
        expected_head: Option<ChainHead>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let new_head = event.as_head();

        let advanced = match expected_head {
            Some(head) => sqlx::query(
                r#"
                UPDATE chain_heads
                SET head_sequence = ?, head_hash = ?, head_created_at = ?
                WHERE entity_type = ? AND entity_id = ?
                  AND head_sequence = ? AND head_hash = ?
                "#,
            )
            .bind(new_head.sequence as i64)
            .bind(hex::encode(new_head.event_hash))
            .bind(canonical_timestamp(&new_head.created_at))
            .bind(event.entity_type.as_str())
            .bind(&event.entity_id)
            .bind(head.sequence as i64)
            .bind(hex::encode(head.event_hash))
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            None => sqlx::query(
                r#"
                INSERT INTO chain_heads (entity_type, entity_id, head_sequence, head_hash, head_created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (entity_type, entity_id) DO NOTHING
                "#,
            )
            .bind(event.entity_type.as_str())
            .bind(&event.entity_id)
            .bind(new_head.sequence as i64)
            .bind(hex::encode(new_head.event_hash))
            .bind(canonical_timestamp(&new_head.created_at))
            .execute(&mut *tx)
            .await?
            .rows_affected(),
        };

        if advanced == 0 {
            return Err(LedgerError::HeadConflict {
                entity_type: event.entity_type.to_string(),
                entity_id: event.entity_id.clone(),
            });
        }

        Self::insert_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
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
            WHERE entity_type = ? AND entity_id = ?
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
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(pointer.evidence_id.to_string())
        .bind(pointer.process_id.entity_id())
        .bind(&pointer.actor_hash)
        .bind(&pointer.storage_bucket)
        .bind(&pointer.storage_path)
        .bind(&pointer.sha256)
        .bind(&pointer.mime_type)
        .bind(pointer.size_bytes as i64)
        .bind(canonical_timestamp(&pointer.created_at))
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
            WHERE evidence_id = ?
            "#,
        )
        .bind(evidence_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(EvidencePointer::try_from).transpose()
    }
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Internal(format!("Invalid {}: {}", field, e)))
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| LedgerError::Internal(format!("Invalid {}: {}", field, e)))
}

fn parse_hash(field: &str, value: &str) -> Result<[u8; 32]> {
    hash256_from_hex(value).ok_or_else(|| LedgerError::Internal(format!("Invalid {}", field)))
}

/// Raw row from processes table
#[derive(Debug, FromRow)]
struct ProcessRow {
    process_id: String,
    process_type: String,
    created_at: String,
}

impl TryFrom<ProcessRow> for ProcessEntity {
    type Error = LedgerError;

    fn try_from(row: ProcessRow) -> Result<Self> {
        Ok(ProcessEntity {
            process_id: ProcessId::from_uuid(parse_uuid("process_id", &row.process_id)?),
            process_type: row.process_type,
            created_at: parse_timestamp("created_at", &row.created_at)?,
        })
    }
}

/// Raw row from chain_heads table
#[derive(Debug, FromRow)]
struct ChainHeadRow {
    head_sequence: i64,
    head_hash: String,
    head_created_at: String,
}

impl TryFrom<ChainHeadRow> for ChainHead {
    type Error = LedgerError;

    fn try_from(row: ChainHeadRow) -> Result<Self> {
        Ok(ChainHead {
            sequence: row.head_sequence as u64,
            event_hash: parse_hash("head_hash", &row.head_hash)?,
            created_at: parse_timestamp("head_created_at", &row.head_created_at)?,
        })
    }
}

/// Raw row from ledger_events table
#[derive(Debug, FromRow)]
struct LedgerEventRow {
    event_id: String,
    entity_type: String,
    entity_id: String,
    sequence_number: i64,
    event_type: String,
    actor_hash: String,
    payload: String,
    parent_event_hash: String,
    current_event_hash: String,
    created_at: String,
}

impl TryFrom<LedgerEventRow> for LedgerEvent {
    type Error = LedgerError;

    fn try_from(row: LedgerEventRow) -> Result<Self> {
        let payload: serde_json::Value = serde_json::from_str(&row.payload)
            .map_err(|e| LedgerError::Internal(format!("Invalid payload JSON: {}", e)))?;

        Ok(LedgerEvent {
            event_id: parse_uuid("event_id", &row.event_id)?,
            sequence_number: row.sequence_number as u64,
            entity_type: EntityType::from(row.entity_type),
            entity_id: row.entity_id,
            event_type: EventType::from(row.event_type),
            actor_hash: row.actor_hash,
            payload,
            parent_event_hash: parse_hash("parent_event_hash", &row.parent_event_hash)?,
            current_event_hash: parse_hash("current_event_hash", &row.current_event_hash)?,
            created_at: parse_timestamp("created_at", &row.created_at)?,
        })
    }
}

/// Raw row from evidence_pointers table
#[derive(Debug, FromRow)]
struct EvidenceRow {
    evidence_id: String,
    process_id: String,
    actor_hash: String,
    storage_bucket: String,
    storage_path: String,
    sha256: String,
    mime_type: String,
    size_bytes: i64,
    created_at: String,
}

impl TryFrom<EvidenceRow> for EvidencePointer {
    type Error = LedgerError;

    fn try_from(row: EvidenceRow) -> Result<Self> {
        Ok(EvidencePointer {
            evidence_id: EvidenceId::from_uuid(parse_uuid("evidence_id", &row.evidence_id)?),
            process_id: ProcessId::from_uuid(parse_uuid("process_id", &row.process_id)?),
            actor_hash: row.actor_hash,
            storage_bucket: row.storage_bucket,
            storage_path: row.storage_path,
            sha256: row.sha256,
            mime_type: row.mime_type,
            size_bytes: row.size_bytes as u64,
            created_at: parse_timestamp("created_at", &row.created_at)?,
        })
    }
}
