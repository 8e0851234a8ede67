//! Record normalization
//!
//! Turns loosely-typed source entries into [`CanonicalRecord`]s. Normalizing
//! never fails: missing fields fall back to defaults and a missing identifier
//! is synthesized according to the configured [`IdStrategy`].

use catalog_common::checksum::digest_parts;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::config::IdStrategy;
use crate::models::{CanonicalRecord, SourceRecord};

/// Display name used when the source has neither `name` nor `exerciseName`.
pub const DEFAULT_DISPLAY_NAME: &str = "Unnamed exercise";

/// Prefix of synthesized identifiers.
const SYNTHETIC_ID_PREFIX: &str = "ex_";

/// Hex characters of the digest kept in a deterministic identifier.
const SYNTHETIC_ID_HEX_LEN: usize = 16;

/// Source keys consulted for the identifier, in order.
const ID_KEYS: &[&str] = &["id", "exerciseId"];

/// Source keys consulted for the display name, in order.
const NAME_KEYS: &[&str] = &["name", "exerciseName"];

/// Maps source records to canonical records for one run
#[derive(Debug, Clone)]
pub struct Normalizer {
    id_strategy: IdStrategy,
    provenance: String,
    ingested_at: DateTime<Utc>,
}

/// Output of normalizing a whole input
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    /// Surviving records in input order, unique by id
    pub records: Vec<CanonicalRecord>,
    /// Ids of records replaced by a later record carrying the same id
    pub superseded: Vec<String>,
}

impl Normalizer {
    pub fn new(id_strategy: IdStrategy, provenance: impl Into<String>) -> Self {
        Self {
            id_strategy,
            provenance: provenance.into(),
            ingested_at: Utc::now(),
        }
    }

    /// Pin the ingestion timestamp
    pub fn with_ingested_at(mut self, ingested_at: DateTime<Utc>) -> Self {
        self.ingested_at = ingested_at;
        self
    }

    pub fn ingested_at(&self) -> DateTime<Utc> {
        self.ingested_at
    }

    /// Normalize a single source record
    pub fn normalize(&self, source: &SourceRecord) -> CanonicalRecord {
        let display_name =
            first_string(source, NAME_KEYS).unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
        let explicit_code = first_string(source, &["code"]);

        let id = first_string(source, ID_KEYS)
            .unwrap_or_else(|| self.synthesize_id(source, &display_name, explicit_code.as_deref()));
        let code = explicit_code.unwrap_or_else(|| id.clone());

        CanonicalRecord {
            code,
            description: first_string(source, &["description"]).unwrap_or_default(),
            primary_muscles: collection(source, "primaryMuscles"),
            secondary_muscles: collection(source, "secondaryMuscles"),
            types: collection(source, "types"),
            categories: collection(source, "categories"),
            provenance: self.provenance.clone(),
            has_image: false,
            name_search: display_name.to_lowercase(),
            display_name,
            ingested_at: self.ingested_at,
            id,
        }
    }

    /// Normalize every record, keeping the last record for each id
    ///
    /// A record whose id reappears later in the input is dropped from its
    /// position and reported in `superseded`; the later record keeps its own
    /// position so write order still follows input order.
    pub fn normalize_all(&self, sources: &[SourceRecord]) -> NormalizedBatch {
        let normalized: Vec<CanonicalRecord> = sources.iter().map(|s| self.normalize(s)).collect();

        let mut last_index: HashMap<&str, usize> = HashMap::with_capacity(normalized.len());
        for (index, record) in normalized.iter().enumerate() {
            last_index.insert(record.id.as_str(), index);
        }

        let mut superseded = Vec::new();
        let mut keep = vec![false; normalized.len()];
        for (index, record) in normalized.iter().enumerate() {
            if last_index.get(record.id.as_str()) == Some(&index) {
                keep[index] = true;
            } else {
                debug!(id = %record.id, position = index, "Record superseded by a later duplicate");
                superseded.push(record.id.clone());
            }
        }

        let records = normalized
            .into_iter()
            .zip(keep)
            .filter_map(|(record, keep)| keep.then_some(record))
            .collect();

        NormalizedBatch { records, superseded }
    }

    fn synthesize_id(
        &self,
        source: &SourceRecord,
        display_name: &str,
        code: Option<&str>,
    ) -> String {
        match self.id_strategy {
            IdStrategy::Deterministic => {
                let has_name = NAME_KEYS.iter().any(|k| non_blank(source.get(k)).is_some());
                let digest = if has_name || code.is_some() {
                    digest_parts(&[display_name, code.unwrap_or_default()])
                } else {
                    // serde_json maps are key-ordered, so this is stable
                    let canonical = Value::Object(source.fields().clone()).to_string();
                    digest_parts(&[canonical.as_str()])
                };
                format!("{}{}", SYNTHETIC_ID_PREFIX, &digest[..SYNTHETIC_ID_HEX_LEN])
            }
            IdStrategy::Random => {
                format!("{}{}", SYNTHETIC_ID_PREFIX, uuid::Uuid::new_v4().simple())
            }
        }
    }
}

/// String value of a field; numbers are rendered, blank strings count as absent
fn non_blank(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_string(source: &SourceRecord, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| non_blank(source.get(key)))
}

/// Array field kept verbatim; a scalar becomes a one-element array
fn collection(source: &SourceRecord, key: &str) -> Vec<Value> {
    match source.get(key) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}
