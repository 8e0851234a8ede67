//! Identity resolution
//!
//! Decides per record whether to insert, merge or skip. All decisions are
//! computed before the first write, and the output keeps input order even
//! when lookups run concurrently.

use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::IdentityPolicy;
use crate::error::{IngestError, Result};
use crate::models::{CanonicalRecord, ExistingRecordRef, DISPLAY_NAME_FIELD};
use crate::report::OutcomeTally;
use crate::store::{bounded, DocumentStore, WriteKind};

/// What to do with one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Create a new document; the store must not already hold the id
    Insert,
    /// Upsert over the record's fields
    Merge,
    /// Leave the store alone; an equivalent record exists
    Skip(ExistingRecordRef),
}

impl Decision {
    /// Write kind for the committer; `None` for skips
    pub fn write_kind(&self) -> Option<WriteKind> {
        match self {
            Decision::Insert => Some(WriteKind::Create),
            Decision::Merge => Some(WriteKind::Merge),
            Decision::Skip(_) => None,
        }
    }
}

/// A record paired with its decision
#[derive(Debug, Clone)]
pub struct ResolvedRecord {
    pub record: CanonicalRecord,
    pub decision: Decision,
}

/// Resolves record identity against the store
pub struct IdentityResolver {
    store: Arc<dyn DocumentStore>,
    collection: String,
    policy: IdentityPolicy,
    timeout: Duration,
    concurrency: usize,
}

impl IdentityResolver {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        policy: IdentityPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            policy,
            timeout,
            concurrency: 1,
        }
    }

    /// Allow this many lookups in flight at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn policy(&self) -> IdentityPolicy {
        self.policy
    }

    /// Find an existing document with the record's display name
    ///
    /// No match is `Ok(None)`; only a failed store call is an error.
    pub async fn lookup(&self, record: &CanonicalRecord) -> Result<Option<ExistingRecordRef>> {
        let name = Value::String(record.display_name.clone());
        let hits = bounded(
            self.timeout,
            self.store.query(&self.collection, DISPLAY_NAME_FIELD, &name, 1),
        )
        .await
        .map_err(|source| IngestError::Lookup {
            id: record.id.clone(),
            source,
        })?;

        Ok(hits.into_iter().next().map(|doc| ExistingRecordRef {
            key: record.display_name.clone(),
            store_document_id: doc.id,
        }))
    }

    /// Find a document already stored under the record's id
    ///
    /// Catches a stored record whose display name changed upstream; creating
    /// it again would conflict on the id.
    pub async fn lookup_id(&self, record: &CanonicalRecord) -> Result<Option<ExistingRecordRef>> {
        let doc = bounded(self.timeout, self.store.get(&self.collection, &record.id))
            .await
            .map_err(|source| IngestError::Lookup {
                id: record.id.clone(),
                source,
            })?;

        Ok(doc.map(|doc| ExistingRecordRef {
            key: record.id.clone(),
            store_document_id: doc.id,
        }))
    }

    /// Decide for a single record, ignoring names claimed earlier in the run
    pub async fn decide(&self, record: &CanonicalRecord) -> Result<Decision> {
        match self.policy {
            IdentityPolicy::KeyIsIdentity => Ok(Decision::Merge),
            IdentityPolicy::LookupByField => {
                if let Some(existing) = self.lookup(record).await? {
                    return Ok(Decision::Skip(existing));
                }
                Ok(match self.lookup_id(record).await? {
                    Some(existing) => Decision::Skip(existing),
                    None => Decision::Insert,
                })
            }
        }
    }

    /// Decide for every record, in input order
    ///
    /// Records whose lookup failed are recorded as failures in `tally` and
    /// left out of the result.
    pub async fn resolve_all(
        &self,
        records: Vec<CanonicalRecord>,
        tally: &mut OutcomeTally,
    ) -> Vec<ResolvedRecord> {
        info!(
            policy = %self.policy,
            records = records.len(),
            concurrency = self.concurrency,
            "Resolving record identity"
        );

        let decisions: Vec<Result<Decision>> = stream::iter(records.iter())
            .map(|record| self.decide(record))
            .buffered(self.concurrency)
            .collect()
            .await;

        // name -> id of the first record inserting it during this run
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut resolved = Vec::with_capacity(records.len());

        for (record, decision) in records.into_iter().zip(decisions) {
            let decision = match decision {
                Ok(Decision::Insert) => match claimed.get(&record.display_name) {
                    Some(first_id) => Decision::Skip(ExistingRecordRef {
                        key: record.display_name.clone(),
                        store_document_id: first_id.clone(),
                    }),
                    None => {
                        claimed.insert(record.display_name.clone(), record.id.clone());
                        Decision::Insert
                    }
                },
                Ok(decision) => decision,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Identity lookup failed");
                    tally.record_failure(record.id.clone(), e.to_string());
                    continue;
                }
            };

            if let Decision::Skip(existing) = &decision {
                debug!(
                    id = %record.id,
                    existing = %existing.store_document_id,
                    name = %existing.key,
                    "Record already present"
                );
            }
            resolved.push(ResolvedRecord { record, decision });
        }

        resolved
    }
}
