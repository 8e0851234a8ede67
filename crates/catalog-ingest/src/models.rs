//! Record shapes flowing through the pipeline

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field map of a stored document
pub type Document = Map<String, Value>;

/// Document field holding the display name; the lookup policy queries it.
pub const DISPLAY_NAME_FIELD: &str = "name";

/// One entry of the input file, with no required shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct SourceRecord(Map<String, Value>);

impl SourceRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Non-object entries degrade to an empty record instead of failing the run.
impl From<Value> for SourceRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self(fields),
            _ => Self::default(),
        }
    }
}

impl From<SourceRecord> for Value {
    fn from(record: SourceRecord) -> Self {
        Value::Object(record.0)
    }
}

/// Normalized, store-ready catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    pub id: String,
    pub code: String,
    #[serde(rename = "name")]
    pub display_name: String,
    pub description: String,
    pub primary_muscles: Vec<Value>,
    pub secondary_muscles: Vec<Value>,
    pub types: Vec<Value>,
    pub categories: Vec<Value>,
    #[serde(rename = "source")]
    pub provenance: String,
    pub has_image: bool,
    pub name_search: String,
    pub ingested_at: DateTime<Utc>,
}

impl CanonicalRecord {
    /// Field map written to the store
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("id".into(), Value::String(self.id.clone()));
        doc.insert("code".into(), Value::String(self.code.clone()));
        doc.insert(DISPLAY_NAME_FIELD.into(), Value::String(self.display_name.clone()));
        doc.insert("description".into(), Value::String(self.description.clone()));
        doc.insert("primaryMuscles".into(), Value::Array(self.primary_muscles.clone()));
        doc.insert("secondaryMuscles".into(), Value::Array(self.secondary_muscles.clone()));
        doc.insert("types".into(), Value::Array(self.types.clone()));
        doc.insert("categories".into(), Value::Array(self.categories.clone()));
        doc.insert("source".into(), Value::String(self.provenance.clone()));
        doc.insert("hasImage".into(), Value::Bool(self.has_image));
        doc.insert("nameSearch".into(), Value::String(self.name_search.clone()));
        doc.insert(
            "ingestedAt".into(),
            Value::String(self.ingested_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        doc
    }
}

/// Reference to a document found by an identity lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingRecordRef {
    /// Value that matched: the display name, or the id when only the id is taken
    pub key: String,
    pub store_document_id: String,
}

/// Document returned by a store read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Document,
}

impl StoredDocument {
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}
