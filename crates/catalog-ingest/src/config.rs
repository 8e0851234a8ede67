//! Ingestion configuration
//!
//! Defaults live in constants, environment variables override them (a `.env`
//! file is honoured), and the CLI layer overrides both before `validate()`.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{IngestError, Result};

// ============================================================================
// Ingestion Configuration Constants
// ============================================================================

/// Largest number of writes the store accepts in one atomic write group.
pub const MAX_WRITE_GROUP_SIZE: usize = 500;

/// Default target collection.
pub const DEFAULT_COLLECTION: &str = "exercises_library";

/// Default provenance label stamped on every record.
pub const DEFAULT_PROVENANCE: &str = "workout-api";

/// Default bound for a single store call in seconds.
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;

/// Default number of documents sampled for the final report.
pub const DEFAULT_SAMPLE_SIZE: usize = 5;

/// Default Firestore database id.
pub const DEFAULT_FIRESTORE_DATABASE: &str = "(default)";

/// How the resolver decides whether a record already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// The record id addresses the document directly; every write is an upsert
    #[default]
    #[value(name = "key", alias = "key-is-identity")]
    KeyIsIdentity,
    /// Look up an existing document by display name; skip when found
    #[value(name = "lookup", alias = "lookup-by-field")]
    LookupByField,
}

impl std::fmt::Display for IdentityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityPolicy::KeyIsIdentity => f.write_str("key"),
            IdentityPolicy::LookupByField => f.write_str("lookup"),
        }
    }
}

/// How an identifier is synthesized for records without one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Stable hash of display name and code; safe to rerun
    #[default]
    Deterministic,
    /// Random token per run; reruns create duplicates
    Random,
}

/// Which document store backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Firestore,
    /// Process-local store, useful for dry runs
    Memory,
}

/// Firestore connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirestoreConfig {
    pub project_id: Option<String>,
    pub database: String,
    /// OAuth access token; never logged
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// `host:port` of a local emulator; disables authentication
    pub emulator_host: Option<String>,
}

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Target collection
    pub collection: String,
    /// Identity resolution policy
    pub policy: IdentityPolicy,
    /// Records per committed write group
    pub chunk_size: usize,
    /// Bound applied to every store call
    pub store_timeout_secs: u64,
    /// Identity lookups allowed in flight at once
    pub lookup_concurrency: usize,
    /// Documents sampled after verification
    pub sample_size: usize,
    /// Fallback identifier strategy
    pub id_strategy: IdStrategy,
    /// Provenance label written on every record
    pub provenance: String,
    /// Store backend
    pub store: StoreKind,
    pub firestore: FirestoreConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            policy: IdentityPolicy::default(),
            chunk_size: MAX_WRITE_GROUP_SIZE,
            store_timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
            lookup_concurrency: 1,
            sample_size: DEFAULT_SAMPLE_SIZE,
            id_strategy: IdStrategy::default(),
            provenance: DEFAULT_PROVENANCE.to_string(),
            store: StoreKind::default(),
            firestore: FirestoreConfig {
                database: DEFAULT_FIRESTORE_DATABASE.to_string(),
                ..Default::default()
            },
        }
    }
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            collection: std::env::var("CATALOG_COLLECTION").unwrap_or(defaults.collection),
            policy: env_enum("CATALOG_POLICY")?.unwrap_or(defaults.policy),
            chunk_size: env_parse("CATALOG_CHUNK_SIZE")?.unwrap_or(defaults.chunk_size),
            store_timeout_secs: env_parse("CATALOG_STORE_TIMEOUT_SECS")?
                .unwrap_or(defaults.store_timeout_secs),
            lookup_concurrency: env_parse("CATALOG_LOOKUP_CONCURRENCY")?
                .unwrap_or(defaults.lookup_concurrency),
            sample_size: env_parse("CATALOG_SAMPLE_SIZE")?.unwrap_or(defaults.sample_size),
            id_strategy: env_enum("CATALOG_ID_STRATEGY")?.unwrap_or(defaults.id_strategy),
            provenance: std::env::var("CATALOG_PROVENANCE").unwrap_or(defaults.provenance),
            store: env_enum("CATALOG_STORE")?.unwrap_or(defaults.store),
            firestore: FirestoreConfig {
                project_id: std::env::var("FIRESTORE_PROJECT_ID").ok(),
                database: std::env::var("FIRESTORE_DATABASE")
                    .unwrap_or(defaults.firestore.database),
                access_token: std::env::var("FIRESTORE_ACCESS_TOKEN").ok(),
                emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST").ok(),
            },
        };

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(IngestError::config("collection name cannot be empty"));
        }
        if self.collection.contains('/') {
            return Err(IngestError::config(format!(
                "collection name '{}' must not contain '/'",
                self.collection
            )));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_WRITE_GROUP_SIZE {
            return Err(IngestError::config(format!(
                "chunk size must be between 1 and {}, got {}",
                MAX_WRITE_GROUP_SIZE, self.chunk_size
            )));
        }
        if self.store_timeout_secs == 0 {
            return Err(IngestError::config("store timeout must be greater than 0"));
        }
        if self.lookup_concurrency == 0 {
            return Err(IngestError::config("lookup concurrency must be at least 1"));
        }
        Ok(())
    }

    /// Get the store call bound as a Duration
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| IngestError::config(format!("{} has an invalid value: '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

fn env_enum<T: ValueEnum>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => T::from_str(raw.trim(), true)
            .map(Some)
            .map_err(|e| IngestError::config(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}
