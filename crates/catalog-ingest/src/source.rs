//! Input loading
//!
//! The input is a single JSON array read fully into memory. Any failure here
//! is fatal to the run and happens before the store is touched.

use catalog_common::checksum::{compute_checksum, ensure_checksum};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{IngestError, Result};
use crate::models::SourceRecord;

/// Parsed input file with its fingerprint
#[derive(Debug, Clone)]
pub struct InputFile {
    pub path: PathBuf,
    pub records: Vec<SourceRecord>,
    /// Lowercase hex SHA-256 of the raw file bytes
    pub sha256: String,
}

impl InputFile {
    /// Read and parse a JSON array of records
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let shown = path.display().to_string();

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| IngestError::input_read(&shown, e.to_string()))?;

        let sha256 = compute_checksum(&mut bytes.as_slice())
            .map_err(|e| IngestError::input_read(&shown, e.to_string()))?;

        let records: Vec<SourceRecord> = serde_json::from_slice(&bytes).map_err(|e| {
            IngestError::input_read(&shown, format!("expected a JSON array of records: {}", e))
        })?;

        info!(path = %shown, records = records.len(), sha256 = %sha256, "Input loaded");

        Ok(Self {
            path: path.to_path_buf(),
            records,
            sha256,
        })
    }

    /// Load and require a known fingerprint
    pub async fn load_verified(path: impl AsRef<Path>, expected_sha256: &str) -> Result<Self> {
        let input = Self::load(path).await?;
        ensure_checksum(&input.sha256, expected_sha256)
            .map_err(|e| IngestError::input_read(input.path.display().to_string(), e.to_string()))?;
        Ok(input)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
