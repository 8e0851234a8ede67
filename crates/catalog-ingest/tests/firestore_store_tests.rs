//! Firestore REST client tests against a mock server

mod common;

use catalog_ingest::config::FirestoreConfig;
use catalog_ingest::store::{DocumentStore, FirestoreStore, MergePolicy, WriteKind, WriteOp};
use catalog_ingest::{IngestionPipeline, RunOutcome, StoreError};
use common::{exercises, test_config};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_partial_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const DOCUMENTS: &str = "/projects/fitness-app/databases/(default)/documents";

fn store_for(server: &MockServer, timeout: Duration) -> FirestoreStore {
    let config = FirestoreConfig {
        project_id: Some("fitness-app".to_string()),
        database: "(default)".to_string(),
        access_token: Some("test-token".to_string()),
        emulator_host: None,
    };
    FirestoreStore::new(&config, timeout)
        .expect("valid config")
        .with_base_url(server.uri())
}

fn stored_doc(id: &str, name: &str) -> serde_json::Value {
    json!({
        "document": {
            "name": format!("projects/fitness-app/databases/(default)/documents/exercises/{}", id),
            "fields": {
                "name": {"stringValue": name},
                "primaryMuscles": {"arrayValue": {"values": [{"stringValue": "Chest"}]}}
            }
        },
        "readTime": "2026-10-17T10:00:00Z"
    })
}

#[tokio::test]
async fn test_commit_group_sends_one_request_with_all_writes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}:commit", DOCUMENTS)))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "writes": [
                {"currentDocument": {"exists": false}},
                {"updateMask": {"fieldPaths": ["name"]}}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "writeResults": [{}, {}],
            "commitTime": "2026-10-17T10:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server, Duration::from_secs(5));
    let fields = json!({"name": "Row"}).as_object().cloned().unwrap_or_default();
    let writes = vec![
        WriteOp {
            document_id: "ex_1".into(),
            fields: fields.clone(),
            kind: WriteKind::Create,
        },
        WriteOp {
            document_id: "ex_2".into(),
            fields,
            kind: WriteKind::Merge,
        },
    ];

    store.commit_group("exercises", &writes).await.expect("commit succeeds");
}

#[tokio::test]
async fn test_error_statuses_map_to_store_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}:commit", DOCUMENTS)))
        .respond_with(ResponseTemplate::new(409).set_body_string("ALREADY_EXISTS"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}:runAggregationQuery", DOCUMENTS)))
        .respond_with(ResponseTemplate::new(403).set_body_string("PERMISSION_DENIED"))
        .mount(&server)
        .await;

    let store = store_for(&server, Duration::from_secs(5));
    let write = WriteOp {
        document_id: "ex_1".into(),
        fields: Default::default(),
        kind: WriteKind::Create,
    };

    let conflict = store.commit_group("exercises", &[write]).await.unwrap_err();
    assert_eq!(conflict, StoreError::Conflict("ALREADY_EXISTS".into()));

    let denied = store.count("exercises").await.unwrap_err();
    assert!(matches!(denied, StoreError::Rejected { status: 403, .. }));
}

#[tokio::test]
async fn test_slow_response_is_a_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}:runQuery", DOCUMENTS)))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let store = store_for(&server, Duration::from_millis(200));
    let err = store
        .query("exercises", "name", &json!("Push-up"), 1)
        .await
        .unwrap_err();

    assert_eq!(err, StoreError::Timeout(Duration::from_millis(200)));
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_query_returns_matches_and_empty_results() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}:runQuery", DOCUMENTS)))
        .and(body_partial_json(json!({
            "structuredQuery": {"where": {"fieldFilter": {"value": {"stringValue": "Push-up"}}}}
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([stored_doc("abc", "Push-up")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}:runQuery", DOCUMENTS)))
        .and(body_partial_json(json!({
            "structuredQuery": {"where": {"fieldFilter": {"value": {"stringValue": "Lunge"}}}}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"readTime": "2026-10-17T10:00:00Z"}])),
        )
        .mount(&server)
        .await;

    let store = store_for(&server, Duration::from_secs(5));

    let hits = store.query("exercises", "name", &json!("Push-up"), 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "abc");
    assert_eq!(hits[0].fields["primaryMuscles"], json!(["Chest"]));

    let none = store.query("exercises", "name", &json!("Lunge"), 1).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_get_by_id_treats_missing_as_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/exercises/wa_00001", DOCUMENTS)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(&stored_doc("wa_00001", "Old name")["document"]),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/exercises/wa_00002", DOCUMENTS)))
        .respond_with(ResponseTemplate::new(404).set_body_string("NOT_FOUND"))
        .mount(&server)
        .await;

    let store = store_for(&server, Duration::from_secs(5));

    let found = store.get("exercises", "wa_00001").await.unwrap().expect("document exists");
    assert_eq!(found.id, "wa_00001");
    assert_eq!(found.fields["name"], json!("Old name"));

    assert_eq!(store.get("exercises", "wa_00002").await.unwrap(), None);
}

#[tokio::test]
async fn test_merge_upsert_uses_update_mask() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path(format!("{}/exercises/ex_9", DOCUMENTS)))
        .and(query_param("updateMask.fieldPaths", "name"))
        .and(query_param("updateMask.fieldPaths", "hasImage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server, Duration::from_secs(5));
    let fields = json!({"name": "Dips", "hasImage": false})
        .as_object()
        .cloned()
        .unwrap_or_default();

    store
        .upsert("exercises", "ex_9", &fields, MergePolicy::Merge)
        .await
        .expect("upsert succeeds");
}

#[tokio::test]
async fn test_pipeline_over_rest_api() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}:commit", DOCUMENTS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"writeResults": []})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}:runAggregationQuery", DOCUMENTS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "result": {"aggregateFields": {"total": {"integerValue": "7"}}},
            "readTime": "2026-10-17T10:00:00Z"
        }])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}:runQuery", DOCUMENTS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            stored_doc("wa_00000", "Exercise 0"),
            stored_doc("wa_00001", "Exercise 1")
        ])))
        .mount(&server)
        .await;

    let store = Arc::new(store_for(&server, Duration::from_secs(5)));
    let config = catalog_ingest::IngestConfig {
        collection: "exercises".to_string(),
        chunk_size: 4,
        ..test_config()
    };

    let summary = IngestionPipeline::new(store, config)
        .run_records(&exercises(7), None, &CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(summary.outcome, RunOutcome::Succeeded);
    assert_eq!(summary.merged, 7);
    assert_eq!(summary.verified_count, Some(7));
    assert_eq!(summary.samples.len(), 2);
    assert_eq!(summary.samples[1].name, "Exercise 1");
}

#[tokio::test]
async fn test_pipeline_aborts_when_store_rejects_first_read() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{}:runQuery", DOCUMENTS)))
        .respond_with(ResponseTemplate::new(503).set_body_string("UNAVAILABLE"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}:commit", DOCUMENTS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"writeResults": []})))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(store_for(&server, Duration::from_secs(5)));
    let summary = IngestionPipeline::new(store, test_config())
        .run_records(&exercises(3), None, &CancellationToken::new())
        .await
        .expect("run completes");

    assert!(matches!(
        summary.outcome,
        RunOutcome::Aborted(ref reason) if reason.contains("UNAVAILABLE")
    ));
    assert_eq!(summary.verified_count, None);
}
