//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use serde_json::json;

use civic_ledger::crypto::sha256_hex;
use civic_ledger::infra::{MemoryBlobStore, RetryConfig, SqliteLedgerStore};
use civic_ledger::LedgerService;

pub type TestService = LedgerService<SqliteLedgerStore, MemoryBlobStore>;

pub const MIB: usize = 1024 * 1024;

/// Ledger service over a private in-memory SQLite database and memory blobs
pub async fn create_test_service() -> TestService {
    create_test_service_with_retries(5).await
}

pub async fn create_test_service_with_retries(max_retries: u32) -> TestService {
    let store = SqliteLedgerStore::in_memory()
        .await
        .expect("in-memory sqlite store");
    LedgerService::new(store, MemoryBlobStore::new(), "evidence-test")
        .with_retry_config(RetryConfig::head_conflict(max_retries))
}

/// Pseudonymous actor token, derived the way a caller would derive one
pub fn actor_hash(name: &str) -> String {
    sha256_hex(format!("actor:{}", name).as_bytes())
}

pub fn citizen() -> String {
    actor_hash("citizen-1")
}

pub fn official() -> String {
    actor_hash("official-1")
}

pub fn status_payload(status: &str) -> serde_json::Value {
    json!({
        "status": status,
        "office": "obras publicas",
    })
}

pub fn note_payload(note: &str) -> serde_json::Value {
    json!({ "note": note })
}

/// Payload with a suspected email address three levels down
pub fn nested_email_payload() -> serde_json::Value {
    json!({
        "status": "in_review",
        "details": {
            "reviewers": ["ventanilla 3", { "contact": "revisor.ana@municipio.gob.mx" }]
        }
    })
}

/// Bytes of a given length; content is irrelevant to the evidence policy
pub fn file_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
