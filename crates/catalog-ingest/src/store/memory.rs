//! In-memory document store
//!
//! Write groups are applied atomically against a copy of the collection.
//! Faults can be injected per call kind so pipelines can be exercised
//! against transport failures without a network.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{DocumentStore, MergePolicy, StoreResult, WriteKind, WriteOp};
use crate::error::StoreError;
use crate::models::{Document, StoredDocument};

type Collection = BTreeMap<String, Document>;

/// Number of calls made against the store, by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub upserts: usize,
    pub queries: usize,
    pub gets: usize,
    pub counts: usize,
    pub commits: usize,
    pub lists: usize,
    pub pings: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.upserts
            + self.queries
            + self.gets
            + self.counts
            + self.commits
            + self.lists
            + self.pings
    }
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    /// 1-based commit call numbers that fail
    failing_commits: HashSet<usize>,
    /// Query values that fail
    failing_lookups: HashSet<String>,
    failing_count: bool,
    commit_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Collection>,
    faults: Faults,
    calls: CallCounts,
    /// Writes per commit call, in call order
    commit_sizes: Vec<usize>,
}

/// Process-local [`DocumentStore`]
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a document directly, bypassing faults and counters
    pub fn seed(&self, collection: &str, id: &str, fields: Document) {
        self.lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
    }

    /// Snapshot of a collection ordered by document id
    pub fn documents(&self, collection: &str) -> Vec<StoredDocument> {
        self.lock()
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| StoredDocument {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn call_counts(&self) -> CallCounts {
        self.lock().calls
    }

    /// Number of writes sent with each commit call, failed calls included
    pub fn commit_sizes(&self) -> Vec<usize> {
        self.lock().commit_sizes.clone()
    }

    /// Make every call fail with a transport error
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().faults.unreachable = unreachable;
    }

    /// Fail the n-th commit call (1-based)
    pub fn fail_commit(&self, call_number: usize) {
        self.lock().faults.failing_commits.insert(call_number);
    }

    /// Fail queries whose value is this string
    pub fn fail_lookup(&self, value: impl Into<String>) {
        self.lock().faults.failing_lookups.insert(value.into());
    }

    /// Fail the verification count
    pub fn fail_count(&self) {
        self.lock().faults.failing_count = true;
    }

    /// Delay every commit, to exercise call bounds
    pub fn delay_commits(&self, delay: Duration) {
        self.lock().faults.commit_delay = Some(delay);
    }

    fn check_reachable(state: &State) -> StoreResult<()> {
        if state.faults.unreachable {
            Err(StoreError::transport("connection refused"))
        } else {
            Ok(())
        }
    }
}

fn apply_write(collection: &mut Collection, write: &WriteOp) -> StoreResult<()> {
    match write.kind {
        WriteKind::Create => {
            if collection.contains_key(&write.document_id) {
                return Err(StoreError::Conflict(write.document_id.clone()));
            }
            collection.insert(write.document_id.clone(), write.fields.clone());
        }
        WriteKind::Merge => {
            let doc = collection.entry(write.document_id.clone()).or_default();
            for (key, value) in &write.fields {
                doc.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        fields: &Document,
        policy: MergePolicy,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        state.calls.upserts += 1;
        Self::check_reachable(&state)?;

        let docs = state.collections.entry(collection.to_string()).or_default();
        match policy {
            MergePolicy::Overwrite => {
                docs.insert(id.to_string(), fields.clone());
            }
            MergePolicy::Merge => {
                let doc = docs.entry(id.to_string()).or_default();
                for (key, value) in fields {
                    doc.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> StoreResult<Vec<StoredDocument>> {
        let mut state = self.lock();
        state.calls.queries += 1;
        Self::check_reachable(&state)?;

        if let Some(needle) = value.as_str() {
            if state.faults.failing_lookups.contains(needle) {
                return Err(StoreError::transport(format!("lookup of '{}' dropped", needle)));
            }
        }

        Ok(state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| fields.get(field) == Some(value))
                    .take(limit)
                    .map(|(id, fields)| StoredDocument {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<StoredDocument>> {
        let mut state = self.lock();
        state.calls.gets += 1;
        Self::check_reachable(&state)?;

        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| StoredDocument {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn count(&self, collection: &str) -> StoreResult<u64> {
        let mut state = self.lock();
        state.calls.counts += 1;
        Self::check_reachable(&state)?;

        if state.faults.failing_count {
            return Err(StoreError::transport("aggregation query interrupted"));
        }

        Ok(state.collections.get(collection).map_or(0, |docs| docs.len() as u64))
    }

    async fn commit_group(&self, collection: &str, writes: &[WriteOp]) -> StoreResult<()> {
        let delay = {
            let mut state = self.lock();
            state.calls.commits += 1;
            state.commit_sizes.push(writes.len());
            state.faults.commit_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        Self::check_reachable(&state)?;

        let call_number = state.calls.commits;
        if state.faults.failing_commits.contains(&call_number) {
            return Err(StoreError::transport(format!(
                "commit {} aborted by injected fault",
                call_number
            )));
        }

        let mut staged = state.collections.get(collection).cloned().unwrap_or_default();
        for write in writes {
            apply_write(&mut staged, write)?;
        }
        state.collections.insert(collection.to_string(), staged);
        Ok(())
    }

    async fn list(&self, collection: &str, limit: usize) -> StoreResult<Vec<StoredDocument>> {
        {
            let mut state = self.lock();
            state.calls.lists += 1;
            Self::check_reachable(&state)?;
        }
        Ok(self.documents(collection).into_iter().take(limit).collect())
    }

    async fn ping(&self, _collection: &str) -> StoreResult<()> {
        let mut state = self.lock();
        state.calls.pings += 1;
        Self::check_reachable(&state)
    }
}
