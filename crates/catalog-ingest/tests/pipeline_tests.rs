//! End-to-end pipeline tests against the in-memory store
//!
//! Covers rerun idempotence for both identity policies, per-chunk failure
//! isolation, tally accounting and the abort path.

mod common;

use anyhow::Result;
use catalog_common::checksum::compute_checksum;
use catalog_ingest::commit::CANCELLED_REASON;
use catalog_ingest::store::InMemoryStore;
use catalog_ingest::{IdentityPolicy, IngestConfig, RunOutcome};
use chrono::{Duration, Utc};
use common::{
    comparable_state, exercise, exercises, memory_pipeline, records, test_config, write_input,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::test]
async fn test_key_policy_rerun_leaves_store_unchanged() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let config = test_config();
    let input = exercises(25);

    let first = memory_pipeline(&store, config.clone())
        .run_records(&input, None, &CancellationToken::new())
        .await?;
    let after_first = comparable_state(&store, &config.collection);

    let second = memory_pipeline(&store, config.clone())
        .with_ingested_at(Utc::now() + Duration::hours(1))
        .run_records(&input, None, &CancellationToken::new())
        .await?;
    let after_second = comparable_state(&store, &config.collection);

    info!(first = first.merged, second = second.merged, "Both runs finished");
    assert_eq!(first.merged, 25);
    assert_eq!(second.merged, 25);
    assert_eq!(after_first, after_second);
    assert_eq!(second.verified_count, Some(25));
    Ok(())
}

#[tokio::test]
async fn test_records_without_ids_get_stable_ids_across_runs() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let config = test_config();
    let input = records(json!([
        {"name": "Push-up", "code": "PU"},
        {"exerciseName": "Squat"},
        {"description": "no name, no code"}
    ]));

    memory_pipeline(&store, config.clone())
        .run_records(&input, None, &CancellationToken::new())
        .await?;
    memory_pipeline(&store, config.clone())
        .run_records(&input, None, &CancellationToken::new())
        .await?;

    let docs = store.documents(&config.collection);
    assert_eq!(docs.len(), 3);
    assert!(docs.iter().all(|d| d.id.starts_with("ex_")));
    Ok(())
}

#[tokio::test]
async fn test_lookup_policy_skips_existing_display_name() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let config = IngestConfig {
        policy: IdentityPolicy::LookupByField,
        ..test_config()
    };
    let existing = json!({"name": "Push-up", "nameSearch": "push-up"});
    store.seed(
        &config.collection,
        "seeded-push-up",
        existing.as_object().cloned().unwrap_or_default(),
    );

    let summary = memory_pipeline(&store, config.clone())
        .run_records(
            &records(json!([{"name": "Push-up"}, {"name": "Dips"}])),
            None,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(store.documents(&config.collection).len(), 2);
    assert_eq!(
        store.documents(&config.collection)[1].id,
        "seeded-push-up",
        "seeded document is kept as is"
    );
    Ok(())
}

#[tokio::test]
async fn test_lookup_policy_rerun_skips_everything() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let config = IngestConfig {
        policy: IdentityPolicy::LookupByField,
        ..test_config()
    };
    let input = exercises(12);

    let first = memory_pipeline(&store, config.clone())
        .run_records(&input, None, &CancellationToken::new())
        .await?;
    let state = comparable_state(&store, &config.collection);

    let second = memory_pipeline(&store, config.clone())
        .run_records(&input, None, &CancellationToken::new())
        .await?;

    assert_eq!(first.created, 12);
    assert_eq!(second.skipped, 12);
    assert_eq!(second.created + second.merged, 0);
    assert_eq!(comparable_state(&store, &config.collection), state);
    Ok(())
}

#[tokio::test]
async fn test_1200_records_commit_in_three_chunks() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let config = test_config();

    let summary = memory_pipeline(&store, config.clone())
        .run_records(&exercises(1200), None, &CancellationToken::new())
        .await?;

    assert_eq!(store.call_counts().commits, 3);
    assert_eq!(store.commit_sizes(), vec![500, 500, 200]);
    assert_eq!(summary.merged, 1200);
    assert_eq!(summary.verified_count, Some(1200));
    assert_eq!(summary.samples.len(), 3);
    assert_eq!(summary.samples[0].primary_muscles, vec!["Chest", "Triceps"]);
    Ok(())
}

#[tokio::test]
async fn test_failing_chunk_does_not_stop_later_chunks() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    store.fail_commit(2);
    let config = test_config();

    let summary = memory_pipeline(&store, config.clone())
        .run_records(&exercises(1200), None, &CancellationToken::new())
        .await?;

    assert_eq!(summary.outcome, RunOutcome::PartiallyFailed);
    assert_eq!(summary.failed, 500);
    assert_eq!(summary.merged, 700);
    assert_eq!(store.call_counts().commits, 3);
    assert_eq!(summary.verified_count, Some(700));

    // the failed chunk is the second one, in input order
    assert_eq!(summary.failure_details[0].id, "wa_00500");
    assert_eq!(summary.failure_details[499].id, "wa_00999");
    assert_eq!(summary.outcome.exit_code(), 1);
    Ok(())
}

#[tokio::test]
async fn test_tally_accounts_for_every_record() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    store.seed(
        "exercises_test",
        "old",
        json!({"name": "Exercise 3"}).as_object().cloned().unwrap_or_default(),
    );
    store.fail_lookup("Exercise 5");
    store.fail_commit(2);
    let config = IngestConfig {
        policy: IdentityPolicy::LookupByField,
        chunk_size: 4,
        ..test_config()
    };

    let mut input: Vec<Value> = (0..12).map(exercise).collect();
    input.push(exercise(0)); // supersedes the first record
    input.push(json!({"name": "Exercise 7", "id": "another-7"})); // name claimed in-run
    input.push(json!(42)); // non-object entry
    let total = input.len() as u64;

    let summary = memory_pipeline(&store, config)
        .run_records(&records(Value::Array(input)), None, &CancellationToken::new())
        .await?;

    info!(?summary, "Mixed run finished");
    assert_eq!(summary.total, total);
    assert!(summary.is_balanced());
    assert_eq!(
        summary.created + summary.merged + summary.skipped + summary.failed,
        total
    );
    // superseded, stored "Exercise 3", in-run duplicate of "Exercise 7"
    assert_eq!(summary.skipped, 3);
    assert!(summary.failure_details.iter().any(|d| d.id == "wa_00005"));
    Ok(())
}

#[tokio::test]
async fn test_unreadable_input_aborts_without_store_calls() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("exercises.json");
    std::fs::write(&path, "[{\"name\": \"Squat\"")?;
    let store = Arc::new(InMemoryStore::new());

    let summary = memory_pipeline(&store, test_config())
        .run_path(&path, None, &CancellationToken::new())
        .await?;

    assert!(matches!(summary.outcome, RunOutcome::Aborted(_)));
    assert_eq!(summary.total, 0);
    assert_eq!(summary.verified_count, None);
    assert_eq!(store.call_counts().total(), 0);
    assert!(summary.to_string().contains("no writes attempted"));
    Ok(())
}

#[tokio::test]
async fn test_input_checksum_is_recorded() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_input(dir.path(), "exercises.json", &json!([exercise(1), exercise(2)]));
    let expected = compute_checksum(&mut std::fs::File::open(&path)?)?;
    let store = Arc::new(InMemoryStore::new());

    let summary = memory_pipeline(&store, test_config())
        .run_path(&path, Some(&expected), &CancellationToken::new())
        .await?;

    assert!(summary.is_success());
    assert_eq!(summary.input_sha256.as_deref(), Some(expected.as_str()));
    Ok(())
}

#[tokio::test]
async fn test_cancelled_run_commits_nothing_and_balances() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = memory_pipeline(&store, test_config())
        .run_records(&exercises(7), None, &cancel)
        .await?;

    assert_eq!(summary.failed, 7);
    assert!(summary.is_balanced());
    assert!(summary.failure_details.iter().all(|d| d.reason == CANCELLED_REASON));
    assert_eq!(store.call_counts().commits, 0);
    assert_eq!(summary.verified_count, Some(0));
    Ok(())
}

#[tokio::test]
async fn test_verification_failure_keeps_tallies() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    store.fail_count();

    let summary = memory_pipeline(&store, test_config())
        .run_records(&exercises(4), None, &CancellationToken::new())
        .await?;

    assert_eq!(summary.outcome, RunOutcome::Succeeded);
    assert_eq!(summary.merged, 4);
    assert_eq!(summary.verified_count, None);

    let json = serde_json::to_value(&summary)?;
    assert_eq!(json["verifiedCount"], Value::Null);
    assert_eq!(json["merged"], json!(4));
    Ok(())
}

#[tokio::test]
async fn test_unreachable_store_aborts_without_writes() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    store.set_unreachable(true);

    for policy in [IdentityPolicy::KeyIsIdentity, IdentityPolicy::LookupByField] {
        let config = IngestConfig {
            policy,
            lookup_concurrency: 4,
            ..test_config()
        };

        let summary = memory_pipeline(&store, config)
            .run_records(&exercises(6), Some("abc123".to_string()), &CancellationToken::new())
            .await?;

        assert!(matches!(summary.outcome, RunOutcome::Aborted(_)));
        assert_eq!(summary.outcome.exit_code(), 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.input_sha256.as_deref(), Some("abc123"));
        assert!(summary.to_string().contains("no writes attempted"));
    }

    let calls = store.call_counts();
    assert_eq!(calls.pings, 2);
    assert_eq!(calls.commits + calls.queries + calls.gets, 0);
    Ok(())
}

#[tokio::test]
async fn test_lookup_policy_survives_record_stored_under_old_name() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let config = IngestConfig {
        policy: IdentityPolicy::LookupByField,
        ..test_config()
    };
    store.seed(
        &config.collection,
        "wa_00001",
        json!({"name": "Old name"}).as_object().cloned().unwrap_or_default(),
    );

    let first = memory_pipeline(&store, config.clone())
        .run_records(&exercises(5), None, &CancellationToken::new())
        .await?;

    assert_eq!(first.outcome, RunOutcome::Succeeded);
    assert_eq!(first.created, 4);
    assert_eq!(first.skipped, 1);
    assert_eq!(first.skip_details[0].id, "wa_00001");
    assert_eq!(store.documents(&config.collection)[1].fields["name"], json!("Old name"));

    let rerun = memory_pipeline(&store, config)
        .run_records(&exercises(5), None, &CancellationToken::new())
        .await?;

    assert_eq!(rerun.failed, 0);
    assert_eq!(rerun.skipped, 5);
    Ok(())
}
