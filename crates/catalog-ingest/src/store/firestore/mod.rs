//! Firestore REST backend
//!
//! Talks to the Firestore v1 REST API with a caller-supplied access token,
//! or to a local emulator when `FIRESTORE_EMULATOR_HOST` is set. Write groups
//! go through `documents:commit`, which applies all writes atomically.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{DocumentStore, MergePolicy, StoreResult, WriteKind, WriteOp};
use crate::config::FirestoreConfig;
use crate::error::{IngestError, StoreError};
use crate::models::{Document, StoredDocument};

pub mod value;

use value::{decode_fields, encode, encode_fields, field_path};

// ============================================================================
// Firestore Client Constants
// ============================================================================

/// Production REST endpoint.
pub const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";

/// Bearer token the emulator accepts for admin access.
const EMULATOR_TOKEN: &str = "owner";

/// Longest response body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Firestore-backed [`DocumentStore`]
#[derive(Debug, Clone)]
pub struct FirestoreStore {
    client: Client,
    base_url: String,
    database_path: String,
    token: String,
    timeout: Duration,
}

impl FirestoreStore {
    /// Build a client from configuration
    ///
    /// Requires a project id and either an access token or an emulator host.
    pub fn new(config: &FirestoreConfig, timeout: Duration) -> Result<Self, IngestError> {
        let project_id = config
            .project_id
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                IngestError::initialization(
                    "FIRESTORE_PROJECT_ID is not set; a project id is required to reach Firestore",
                )
            })?;

        let (base_url, token) = match (&config.emulator_host, &config.access_token) {
            (Some(host), _) => (format!("http://{}/v1", host), EMULATOR_TOKEN.to_string()),
            (None, Some(token)) if !token.trim().is_empty() => {
                (DEFAULT_FIRESTORE_URL.to_string(), token.trim().to_string())
            }
            _ => {
                return Err(IngestError::initialization(
                    "no Firestore credentials: \
                     set FIRESTORE_ACCESS_TOKEN or FIRESTORE_EMULATOR_HOST",
                ))
            }
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                IngestError::initialization(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            database_path: format!("projects/{}/databases/{}", project_id, config.database),
            token,
            timeout,
        })
    }

    /// Point the client at another endpoint (used against mock servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/documents/{}/{}", self.database_path, collection, id)
    }

    fn rpc_url(&self, method: &str) -> String {
        format!("{}/{}/documents:{}", self.base_url, self.database_path, method)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", self.base_url, self.document_name(collection, id))
    }

    async fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message: String = body.chars().take(MAX_ERROR_BODY).collect();
        Err(match status {
            StatusCode::NOT_FOUND => StoreError::NotFound(message),
            StatusCode::CONFLICT => StoreError::Conflict(message),
            _ => StoreError::Rejected {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn send_json(&self, request: RequestBuilder) -> StoreResult<Value> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::transport(err.to_string())
        }
    }

    fn write_body(&self, collection: &str, write: &WriteOp) -> Value {
        let update = json!({
            "name": self.document_name(collection, &write.document_id),
            "fields": encode_fields(&write.fields),
        });

        match write.kind {
            WriteKind::Create => json!({
                "update": update,
                "currentDocument": { "exists": false },
            }),
            WriteKind::Merge => json!({
                "update": update,
                "updateMask": {
                    "fieldPaths": write.fields.keys().map(|k| field_path(k)).collect::<Vec<_>>()
                },
            }),
        }
    }

    async fn run_query(&self, structured_query: Value) -> StoreResult<Vec<StoredDocument>> {
        let url = self.rpc_url("runQuery");
        let body = json!({ "structuredQuery": structured_query });
        let rows = self.send_json(self.client.post(&url).json(&body)).await?;

        Ok(rows
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| parse_document(row.get("document")?))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Parse a REST `Document` into id and decoded fields
fn parse_document(document: &Value) -> Option<StoredDocument> {
    let name = document.get("name")?.as_str()?;
    let id = name.rsplit('/').next()?.to_string();
    let fields = document
        .get("fields")
        .and_then(Value::as_object)
        .map(decode_fields)
        .unwrap_or_default();
    Some(StoredDocument { id, fields })
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    fn backend(&self) -> &str {
        "firestore"
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        fields: &Document,
        policy: MergePolicy,
    ) -> StoreResult<()> {
        let mut request = self
            .client
            .patch(self.document_url(collection, id))
            .json(&json!({ "fields": encode_fields(fields) }));

        if policy == MergePolicy::Merge {
            let mask: Vec<(&str, String)> = fields
                .keys()
                .map(|k| ("updateMask.fieldPaths", field_path(k)))
                .collect();
            request = request.query(&mask);
        }

        self.send(request).await?;
        debug!(collection, id, "Document upserted");
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> StoreResult<Vec<StoredDocument>> {
        self.run_query(json!({
            "from": [{ "collectionId": collection }],
            "where": {
                "fieldFilter": {
                    "field": { "fieldPath": field_path(field) },
                    "op": "EQUAL",
                    "value": encode(value),
                }
            },
            "limit": limit,
        }))
        .await
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<StoredDocument>> {
        let request = self.client.get(self.document_url(collection, id));
        match self.send_json(request).await {
            Ok(document) => Ok(parse_document(&document)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn count(&self, collection: &str) -> StoreResult<u64> {
        let url = self.rpc_url("runAggregationQuery");
        let body = json!({
            "structuredAggregationQuery": {
                "structuredQuery": { "from": [{ "collectionId": collection }] },
                "aggregations": [{ "alias": "total", "count": {} }],
            }
        });
        let rows = self.send_json(self.client.post(&url).json(&body)).await?;

        let count = rows
            .as_array()
            .and_then(|rows| {
                rows.iter()
                    .find_map(|row| row.pointer("/result/aggregateFields/total"))
            })
            .and_then(|total| match total.get("integerValue")? {
                Value::String(s) => s.parse::<u64>().ok(),
                Value::Number(n) => n.as_u64(),
                _ => None,
            })
            .ok_or_else(|| StoreError::Rejected {
                status: 200,
                message: "aggregation response carried no count".to_string(),
            })?;

        Ok(count)
    }

    async fn commit_group(&self, collection: &str, writes: &[WriteOp]) -> StoreResult<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let body = json!({
            "writes": writes.iter().map(|w| self.write_body(collection, w)).collect::<Vec<_>>()
        });
        self.send(self.client.post(self.rpc_url("commit")).json(&body))
            .await?;
        debug!(collection, writes = writes.len(), "Write group committed");
        Ok(())
    }

    async fn list(&self, collection: &str, limit: usize) -> StoreResult<Vec<StoredDocument>> {
        self.run_query(json!({
            "from": [{ "collectionId": collection }],
            "limit": limit,
        }))
        .await
    }
}
