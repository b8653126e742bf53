//! Civic process entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LedgerEvent, ProcessId};

/// One civic process instance. Created once, never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntity {
    pub process_id: ProcessId,
    pub process_type: String,
    pub created_at: DateTime<Utc>,
}

/// Result of creating a process: the entity plus its genesis event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessCreated {
    pub process: ProcessEntity,
    pub genesis_event: LedgerEvent,
}
