//! Runtime configuration from environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::infra::{LedgerError, Result, RetryConfig};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://civic_ledger.db?mode=rwc";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_EVIDENCE_ROOT: &str = "./evidence-store";
pub const DEFAULT_EVIDENCE_BUCKET: &str = "evidence";
pub const DEFAULT_APPEND_MAX_RETRIES: u32 = 5;

/// Which ledger store a database URL selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Backend::Postgres)
        } else {
            let scheme = url.split(':').next().unwrap_or_default();
            Err(LedgerError::Configuration(format!(
                "unsupported database scheme: {}",
                scheme
            )))
        }
    }
}

/// Ledger configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite or PostgreSQL connection URL.
    pub database_url: String,
    /// Maximum database connections.
    pub max_connections: u32,
    /// Directory the filesystem blob store writes under.
    pub evidence_root: PathBuf,
    /// Bucket name recorded on evidence pointers.
    pub evidence_bucket: String,
    /// Retries after a chain-head conflict.
    pub append_max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            evidence_root: PathBuf::from(DEFAULT_EVIDENCE_ROOT),
            evidence_bucket: DEFAULT_EVIDENCE_BUCKET.to_string(),
            append_max_retries: DEFAULT_APPEND_MAX_RETRIES,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: parse_or(&lookup, "MAX_DB_CONNECTIONS", defaults.max_connections),
            evidence_root: lookup("EVIDENCE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.evidence_root),
            evidence_bucket: lookup("EVIDENCE_BUCKET").unwrap_or(defaults.evidence_bucket),
            append_max_retries: parse_or(
                &lookup,
                "APPEND_MAX_RETRIES",
                defaults.append_max_retries,
            ),
        }
    }

    pub fn backend(&self) -> Result<Backend> {
        Backend::from_url(&self.database_url)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default().with_max_retries(self.append_max_retries)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match lookup(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.evidence_bucket, "evidence");
        assert_eq!(config.append_max_retries, 5);
        assert_eq!(config.backend().unwrap(), Backend::Sqlite);
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/ledger"),
            ("MAX_DB_CONNECTIONS", "many"),
            ("APPEND_MAX_RETRIES", " 9 "),
            ("EVIDENCE_ROOT", "/var/lib/evidence"),
        ]));
        assert_eq!(config.backend().unwrap(), Backend::Postgres);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.append_max_retries, 9);
        assert_eq!(config.evidence_root, PathBuf::from("/var/lib/evidence"));
        let retry = config.retry_config();
        assert_eq!(retry.max_retries, 9);
        assert_eq!(retry.initial_delay, RetryConfig::default().initial_delay);
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = Backend::from_url("mysql://localhost/db").unwrap_err();
        assert!(matches!(err, LedgerError::Configuration(_)));
    }
}
