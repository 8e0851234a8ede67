//! Shared fixtures for catalog-ingest integration tests

#![allow(dead_code)]

use catalog_ingest::models::SourceRecord;
use catalog_ingest::store::InMemoryStore;
use catalog_ingest::{IngestConfig, IngestionPipeline};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,catalog_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

#[ctor::ctor]
fn init() {
    init_tracing();
}

/// One exercise in the shape the workout API exports
pub fn exercise(index: usize) -> Value {
    json!({
        "id": format!("wa_{:05}", index),
        "name": format!("Exercise {}", index),
        "description": "Keep the core braced",
        "primaryMuscles": [{"id": index % 7, "name": "Chest"}, {"id": 9, "name": "Triceps"}],
        "secondaryMuscles": ["Shoulders"],
        "types": ["strength"],
        "categories": [{"id": 1, "name": "Bodyweight"}]
    })
}

/// `count` exercises as source records
pub fn exercises(count: usize) -> Vec<SourceRecord> {
    (0..count).map(|i| SourceRecord::from(exercise(i))).collect()
}

pub fn records(value: Value) -> Vec<SourceRecord> {
    serde_json::from_value(value).expect("fixture must be a JSON array")
}

/// Write `value` as the input file `name` under `dir`
pub fn write_input(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(value).expect("serialize fixture"))
        .expect("write fixture");
    path
}

/// Config targeting a throwaway collection
pub fn test_config() -> IngestConfig {
    IngestConfig {
        collection: "exercises_test".to_string(),
        sample_size: 3,
        ..Default::default()
    }
}

pub fn memory_pipeline(store: &Arc<InMemoryStore>, config: IngestConfig) -> IngestionPipeline {
    IngestionPipeline::new(store.clone(), config)
}

/// Stored documents with the run timestamp removed
pub fn comparable_state(store: &InMemoryStore, collection: &str) -> Vec<(String, Value)> {
    store
        .documents(collection)
        .into_iter()
        .map(|doc| {
            let mut fields = doc.fields;
            fields.remove("ingestedAt");
            (doc.id, Value::Object(fields))
        })
        .collect()
}
