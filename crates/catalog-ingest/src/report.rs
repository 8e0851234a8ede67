//! Outcome tally and run summary
//!
//! [`OutcomeTally`] is the explicit accumulator threaded through the
//! resolver and committer. [`IngestionReport`] reads the store once after the
//! chunk loop and folds everything into a [`RunSummary`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::IdentityPolicy;
use crate::error::IngestError;
use crate::models::{StoredDocument, DISPLAY_NAME_FIELD};
use crate::store::{bounded, DocumentStore};

/// Why one record was failed or skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDetail {
    pub id: String,
    pub reason: String,
}

/// Per-run outcome counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeTally {
    pub created: u64,
    pub merged: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failure_details: Vec<RecordDetail>,
    pub skip_details: Vec<RecordDetail>,
}

impl OutcomeTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_created(&mut self) {
        self.created += 1;
    }

    pub fn inc_merged(&mut self) {
        self.merged += 1;
    }

    /// Record one skipped record with its reason
    pub fn record_skip(&mut self, id: impl Into<String>, reason: impl Into<String>) {
        self.skipped += 1;
        self.skip_details.push(RecordDetail {
            id: id.into(),
            reason: reason.into(),
        });
    }

    /// Record one failed record with its reason
    pub fn record_failure(&mut self, id: impl Into<String>, reason: impl Into<String>) {
        self.failed += 1;
        self.failure_details.push(RecordDetail {
            id: id.into(),
            reason: reason.into(),
        });
    }

    /// Record every record of a failed chunk with the same reason
    pub fn record_chunk_failure<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a str>,
        reason: &str,
    ) {
        for id in ids {
            self.record_failure(id, reason);
        }
    }

    /// Records accounted for so far
    pub fn total(&self) -> u64 {
        self.created + self.merged + self.skipped + self.failed
    }
}

/// Overall result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum RunOutcome {
    /// Every record was written or deliberately skipped
    Succeeded,
    /// The run completed but some records failed
    PartiallyFailed,
    /// A fatal initialization error stopped the run before any write
    Aborted(String),
}

impl RunOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Succeeded => 0,
            RunOutcome::PartiallyFailed => 1,
            RunOutcome::Aborted(_) => 2,
        }
    }
}

/// One sampled document for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleEntry {
    pub id: String,
    pub name: String,
    pub primary_muscles: Vec<String>,
}

impl SampleEntry {
    fn from_document(doc: &StoredDocument) -> Self {
        let primary_muscles = doc
            .fields
            .get("primaryMuscles")
            .and_then(Value::as_array)
            .map(|muscles| muscles.iter().take(2).filter_map(muscle_label).collect())
            .unwrap_or_default();

        Self {
            id: doc.id.clone(),
            name: doc.field_str(DISPLAY_NAME_FIELD).unwrap_or_default().to_string(),
            primary_muscles,
        }
    }
}

/// Muscles are either plain strings or objects with a `name`
fn muscle_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Structured result of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub collection: String,
    pub policy: IdentityPolicy,
    pub total: u64,
    pub created: u64,
    pub merged: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failure_details: Vec<RecordDetail>,
    pub skip_details: Vec<RecordDetail>,
    /// `None` when the verification read failed or never ran
    pub verified_count: Option<u64>,
    pub samples: Vec<SampleEntry>,
    pub input_sha256: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl RunSummary {
    /// Summary of a run that never reached the store
    pub fn aborted(
        error: &IngestError,
        collection: impl Into<String>,
        policy: IdentityPolicy,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed_at = Utc::now();
        Self {
            outcome: RunOutcome::Aborted(error.to_string()),
            collection: collection.into(),
            policy,
            total: 0,
            created: 0,
            merged: 0,
            skipped: 0,
            failed: 0,
            failure_details: Vec::new(),
            skip_details: Vec::new(),
            verified_count: None,
            samples: Vec::new(),
            input_sha256: None,
            started_at,
            completed_at,
            duration_secs: elapsed_secs(started_at, completed_at),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Whether every input record is accounted for
    pub fn is_balanced(&self) -> bool {
        self.created + self.merged + self.skipped + self.failed == self.total
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(50);
        writeln!(f, "{}", rule)?;
        match &self.outcome {
            RunOutcome::Aborted(reason) => {
                writeln!(f, "IMPORT ABORTED (no writes attempted)")?;
                writeln!(f, "Reason: {}", reason)?;
                return writeln!(f, "{}", rule);
            }
            RunOutcome::Succeeded => writeln!(f, "IMPORT COMPLETED")?,
            RunOutcome::PartiallyFailed => writeln!(
                f,
                "IMPORT COMPLETED WITH {} FAILURES OUT OF {} RECORDS",
                self.failed, self.total
            )?,
        }
        writeln!(f, "Collection: {} (policy: {})", self.collection, self.policy)?;
        writeln!(f, "Created:    {}", self.created)?;
        writeln!(f, "Merged:     {}", self.merged)?;
        writeln!(f, "Skipped:    {}", self.skipped)?;
        writeln!(f, "Failed:     {}", self.failed)?;
        writeln!(f, "Total:      {}", self.total)?;
        match self.verified_count {
            Some(count) => writeln!(f, "Documents in store: {}", count)?,
            None => writeln!(f, "Documents in store: unknown")?,
        }
        writeln!(f, "Duration:   {:.2}s", self.duration_secs)?;
        writeln!(f, "{}", rule)?;

        for failure in &self.failure_details {
            writeln!(f, "  failed {}: {}", failure.id, failure.reason)?;
        }

        if !self.samples.is_empty() {
            writeln!(f, "Sample documents:")?;
            for (index, sample) in self.samples.iter().enumerate() {
                let muscles = if sample.primary_muscles.is_empty() {
                    "N/A".to_string()
                } else {
                    sample.primary_muscles.join(", ")
                };
                writeln!(f, "  {}. {} ({})", index + 1, sample.name, muscles)?;
            }
        }
        Ok(())
    }
}

fn elapsed_secs(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

/// Read-only verification and summary assembly
pub struct IngestionReport {
    store: Arc<dyn DocumentStore>,
    collection: String,
    sample_size: usize,
    timeout: Duration,
}

/// Result of the post-commit verification read
#[derive(Debug, Clone, Default)]
pub struct Verification {
    pub count: Option<u64>,
    pub samples: Vec<SampleEntry>,
}

impl IngestionReport {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        sample_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            sample_size,
            timeout,
        }
    }

    /// Count documents and sample a few; failures leave the count unknown
    pub async fn verify(&self) -> Verification {
        let count = match bounded(self.timeout, self.store.count(&self.collection)).await {
            Ok(count) => {
                info!(collection = %self.collection, count, "Verification count read");
                Some(count)
            }
            Err(e) => {
                let err = IngestError::Verification(e);
                warn!(
                    collection = %self.collection,
                    error = %err,
                    "Verification count unavailable"
                );
                None
            }
        };

        let samples = if self.sample_size > 0 && count.is_some_and(|c| c > 0) {
            match bounded(self.timeout, self.store.list(&self.collection, self.sample_size)).await {
                Ok(docs) => docs.iter().map(SampleEntry::from_document).collect(),
                Err(e) => {
                    warn!(collection = %self.collection, error = %e, "Sampling documents failed");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Verification { count, samples }
    }

    /// Fold the tally and verification into the final summary
    pub fn summarize(
        &self,
        tally: OutcomeTally,
        total: u64,
        verification: Verification,
        policy: IdentityPolicy,
        input_sha256: Option<String>,
        started_at: DateTime<Utc>,
    ) -> RunSummary {
        let completed_at = Utc::now();
        let outcome = if tally.failed == 0 {
            RunOutcome::Succeeded
        } else {
            RunOutcome::PartiallyFailed
        };

        RunSummary {
            outcome,
            collection: self.collection.clone(),
            policy,
            total,
            created: tally.created,
            merged: tally.merged,
            skipped: tally.skipped,
            failed: tally.failed,
            failure_details: tally.failure_details,
            skip_details: tally.skip_details,
            verified_count: verification.count,
            samples: verification.samples,
            input_sha256,
            started_at,
            completed_at,
            duration_secs: elapsed_secs(started_at, completed_at),
        }
    }
}
