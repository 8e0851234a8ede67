//! Ingestion pipeline
//!
//! Drives one run through its phases:
//!
//! ```text
//! INIT -> NORMALIZING -> RESOLVING -> COMMITTING -> VERIFYING -> DONE
//!   \
//!    -> ABORTED
//! ```
//!
//! Phases only move forward. An unreadable input aborts from INIT before the
//! store is called, and a store that does not answer a single read aborts
//! before any write. Every later failure is folded into the tally.

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::commit::BatchCommitter;
use crate::config::{IdStrategy, IngestConfig};
use crate::error::{IngestError, Result};
use crate::models::SourceRecord;
use crate::normalize::Normalizer;
use crate::report::{IngestionReport, OutcomeTally, RunSummary};
use crate::resolve::{Decision, IdentityResolver};
use crate::source::InputFile;
use crate::store::{bounded, DocumentStore};

/// Skip reason for a record replaced by a later one with the same id.
pub const SUPERSEDED_REASON: &str = "superseded by a later record with the same id";

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Init,
    Normalizing,
    Resolving,
    Committing,
    Verifying,
    Done,
    Aborted,
}

impl RunPhase {
    /// Whether `next` directly follows this phase
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (RunPhase::Init, RunPhase::Normalizing)
                | (RunPhase::Init, RunPhase::Aborted)
                | (RunPhase::Normalizing, RunPhase::Resolving)
                | (RunPhase::Resolving, RunPhase::Committing)
                | (RunPhase::Committing, RunPhase::Verifying)
                | (RunPhase::Verifying, RunPhase::Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Aborted)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "INIT",
            RunPhase::Normalizing => "NORMALIZING",
            RunPhase::Resolving => "RESOLVING",
            RunPhase::Committing => "COMMITTING",
            RunPhase::Verifying => "VERIFYING",
            RunPhase::Done => "DONE",
            RunPhase::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Forward-only phase tracker of one run
#[derive(Debug)]
pub struct PhaseTracker {
    phase: RunPhase,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Init,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Move to `next`, refusing anything but the following phase
    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(IngestError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        info!(from = %self.phase, to = %next, "Run phase changed");
        self.phase = next;
        Ok(())
    }
}

/// Orchestrates normalizer, resolver, committer and report for one run
pub struct IngestionPipeline {
    store: Arc<dyn DocumentStore>,
    config: IngestConfig,
    progress: ProgressBar,
    ingested_at: Option<DateTime<Utc>>,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn DocumentStore>, config: IngestConfig) -> Self {
        Self {
            store,
            config,
            progress: ProgressBar::hidden(),
            ingested_at: None,
        }
    }

    /// Report chunk progress on this bar
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Pin the run timestamp instead of taking the clock at run start
    pub fn with_ingested_at(mut self, ingested_at: DateTime<Utc>) -> Self {
        self.ingested_at = Some(ingested_at);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Load `path` and run it
    ///
    /// Input failures end the run as ABORTED without any store call; the
    /// returned summary carries the reason.
    pub async fn run_path(
        &self,
        path: impl AsRef<Path>,
        expected_sha256: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        let loaded = match expected_sha256 {
            Some(expected) => InputFile::load_verified(path, expected).await,
            None => InputFile::load(path).await,
        };

        match loaded {
            Ok(input) => self.run(&input, cancel).await,
            Err(e) => {
                let mut tracker = PhaseTracker::new();
                tracker.advance(RunPhase::Aborted)?;
                error!(error = %e, "Run aborted before any write");
                Ok(RunSummary::aborted(
                    &e,
                    &self.config.collection,
                    self.config.policy,
                    started_at,
                ))
            }
        }
    }

    /// Run a loaded input file
    pub async fn run(&self, input: &InputFile, cancel: &CancellationToken) -> Result<RunSummary> {
        self.run_records(&input.records, Some(input.sha256.clone()), cancel)
            .await
    }

    /// Run already parsed records
    pub async fn run_records(
        &self,
        sources: &[SourceRecord],
        input_sha256: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        let config = &self.config;
        let timeout = config.store_timeout();
        let mut tracker = PhaseTracker::new();
        let mut tally = OutcomeTally::new();

        info!(
            backend = self.store.backend(),
            collection = %config.collection,
            policy = %config.policy,
            records = sources.len(),
            "Starting catalog ingestion"
        );
        if config.id_strategy == IdStrategy::Random {
            warn!(
                "Random identifier fallback is enabled; \
                 records without an id will be duplicated on rerun"
            );
        }

        if let Err(e) = bounded(timeout, self.store.ping(&config.collection)).await {
            let err = IngestError::initialization(format!(
                "cannot reach the {} store: {}",
                self.store.backend(),
                e
            ));
            tracker.advance(RunPhase::Aborted)?;
            error!(error = %err, "Run aborted before any write");
            let mut summary =
                RunSummary::aborted(&err, &config.collection, config.policy, started_at);
            summary.input_sha256 = input_sha256;
            return Ok(summary);
        }

        tracker.advance(RunPhase::Normalizing)?;
        let normalizer = Normalizer::new(config.id_strategy, &config.provenance)
            .with_ingested_at(self.ingested_at.unwrap_or(started_at));
        let batch = normalizer.normalize_all(sources);
        for id in &batch.superseded {
            tally.record_skip(id.clone(), SUPERSEDED_REASON);
        }
        info!(
            records = batch.records.len(),
            superseded = batch.superseded.len(),
            "Records normalized"
        );

        tracker.advance(RunPhase::Resolving)?;
        let resolver = IdentityResolver::new(
            self.store.clone(),
            &config.collection,
            config.policy,
            timeout,
        )
        .with_concurrency(config.lookup_concurrency);
        let resolved = resolver.resolve_all(batch.records, &mut tally).await;
        for entry in &resolved {
            if let Decision::Skip(existing) = &entry.decision {
                tally.record_skip(
                    entry.record.id.clone(),
                    format!(
                        "'{}' already stored as document {}",
                        existing.key, existing.store_document_id
                    ),
                );
            }
        }

        tracker.advance(RunPhase::Committing)?;
        let committer = BatchCommitter::new(
            self.store.clone(),
            &config.collection,
            config.chunk_size,
            timeout,
        )
        .with_progress(self.progress.clone());
        let stats = committer.commit_all(&resolved, &mut tally, cancel).await;
        info!(
            committed = stats.chunks_committed,
            failed = stats.chunks_failed,
            cancelled = stats.chunks_cancelled,
            "Commit phase finished"
        );

        tracker.advance(RunPhase::Verifying)?;
        let report = IngestionReport::new(
            self.store.clone(),
            &config.collection,
            config.sample_size,
            timeout,
        );
        let verification = report.verify().await;

        tracker.advance(RunPhase::Done)?;
        let summary = report.summarize(
            tally,
            sources.len() as u64,
            verification,
            config.policy,
            input_sha256,
            started_at,
        );

        if !summary.is_balanced() {
            error!(
                total = summary.total,
                created = summary.created,
                merged = summary.merged,
                skipped = summary.skipped,
                failed = summary.failed,
                "Outcome tally does not account for every input record"
            );
        }

        info!(
            created = summary.created,
            merged = summary.merged,
            skipped = summary.skipped,
            failed = summary.failed,
            verified = ?summary.verified_count,
            duration_secs = summary.duration_secs,
            "Catalog ingestion finished"
        );

        Ok(summary)
    }
}
