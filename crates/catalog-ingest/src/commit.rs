//! Chunked commits
//!
//! Writes are grouped into chunks of at most [`MAX_WRITE_GROUP_SIZE`] and each
//! chunk is one atomic `commit_group` call. Chunks run strictly one after the
//! other in input order. A failed chunk is counted failed as a whole and is
//! not retried; later chunks still run.

use indicatif::ProgressBar;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MAX_WRITE_GROUP_SIZE;
use crate::error::IngestError;
use crate::report::OutcomeTally;
use crate::resolve::ResolvedRecord;
use crate::store::{bounded, DocumentStore, WriteKind, WriteOp};

/// Failure reason for records never attempted because the run was cancelled.
pub const CANCELLED_REASON: &str = "run cancelled before commit";

/// Chunk-level counts of one commit pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub chunks_committed: usize,
    pub chunks_failed: usize,
    pub chunks_cancelled: usize,
}

/// Split `len` items into consecutive ranges of at most `chunk_size`
pub fn plan_chunks(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let size = chunk_size.clamp(1, MAX_WRITE_GROUP_SIZE);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Commits resolved records in sequential chunks
pub struct BatchCommitter {
    store: Arc<dyn DocumentStore>,
    collection: String,
    chunk_size: usize,
    timeout: Duration,
    progress: ProgressBar,
}

impl BatchCommitter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        chunk_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            chunk_size: chunk_size.clamp(1, MAX_WRITE_GROUP_SIZE),
            timeout,
            progress: ProgressBar::hidden(),
        }
    }

    /// Advance this bar by one per chunk
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Commit every writable record, folding outcomes into `tally`
    ///
    /// Skip decisions are ignored here; the caller accounts for them.
    /// Cancellation is honoured between chunks: the remaining records are
    /// counted failed and nothing already committed is touched.
    pub async fn commit_all(
        &self,
        records: &[ResolvedRecord],
        tally: &mut OutcomeTally,
        cancel: &CancellationToken,
    ) -> CommitStats {
        let writes: Vec<(&ResolvedRecord, WriteKind)> = records
            .iter()
            .filter_map(|r| r.decision.write_kind().map(|kind| (r, kind)))
            .collect();

        let chunks = plan_chunks(writes.len(), self.chunk_size);
        let chunk_count = chunks.len();
        let mut stats = CommitStats::default();

        self.progress.set_length(chunk_count as u64);
        self.progress.set_message(format!("Committing to {}", self.collection));
        info!(
            collection = %self.collection,
            records = writes.len(),
            chunks = chunk_count,
            chunk_size = self.chunk_size,
            "Starting chunked commit"
        );

        for (index, range) in chunks.into_iter().enumerate() {
            let chunk = &writes[range];
            let chunk_number = index + 1;

            if cancel.is_cancelled() {
                warn!(
                    chunk = chunk_number,
                    records = chunk.len(),
                    "Run cancelled; chunk not attempted"
                );
                tally.record_chunk_failure(
                    chunk.iter().map(|(r, _)| r.record.id.as_str()),
                    CANCELLED_REASON,
                );
                stats.chunks_cancelled += 1;
                self.progress.inc(1);
                continue;
            }

            let ops: Vec<WriteOp> = chunk
                .iter()
                .map(|(r, kind)| WriteOp {
                    document_id: r.record.id.clone(),
                    fields: r.record.to_document(),
                    kind: *kind,
                })
                .collect();

            match bounded(self.timeout, self.store.commit_group(&self.collection, &ops)).await {
                Ok(()) => {
                    for op in &ops {
                        match op.kind {
                            WriteKind::Create => tally.inc_created(),
                            WriteKind::Merge => tally.inc_merged(),
                        }
                    }
                    stats.chunks_committed += 1;
                    info!(
                        chunk = chunk_number,
                        of = chunk_count,
                        records = ops.len(),
                        "Chunk committed"
                    );
                }
                Err(source) => {
                    let err = IngestError::Commit {
                        chunk: chunk_number,
                        records: ops.len(),
                        source,
                    };
                    error!(chunk = chunk_number, error = %err, "Chunk commit failed");
                    let reason = err.to_string();
                    tally.record_chunk_failure(
                        ops.iter().map(|op| op.document_id.as_str()),
                        &reason,
                    );
                    stats.chunks_failed += 1;
                }
            }
            self.progress.inc(1);
        }

        self.progress.finish_and_clear();
        stats
    }
}
