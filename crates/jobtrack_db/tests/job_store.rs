use chrono::{TimeZone, Utc};
use jobtrack_db::{JobStatus, JobStore, MetadataValue, NewJob, NewLogEntry, StoreConfig, StoreError};
use serde_json::json;
use sqlx::Row;
use tempfile::TempDir;

async fn memory_store() -> JobStore {
    JobStore::open(StoreConfig::sqlite_memory()).await.unwrap()
}

async fn file_store(tmp: &TempDir) -> JobStore {
    let path = tmp.path().join("jobs.db");
    JobStore::open(StoreConfig::sqlite(path.to_string_lossy()).with_max_connections(4))
        .await
        .unwrap()
}

async fn count(store: &JobStore, table: &str, job_id: &str) -> i64 {
    sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table} WHERE job_id = ?"))
        .bind(job_id)
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get("n")
}

fn sample_job(job_id: &str) -> NewJob {
    NewJob::new(job_id, "job-key", "upload", "api-key")
        .with_data(json!({"resource_id": "r1"}))
        .with_metadata("a", "s")
        .with_metadata("b", json!([1, 2, 3]))
        .with_result_url("http://ckan.example/callback")
}

#[tokio::test]
async fn test_metadata_roundtrip_preserves_types() {
    let store = memory_store().await;
    store.create_job(sample_job("job-1")).await.unwrap();

    let job = store.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(job.metadata["a"], MetadataValue::Text("s".to_string()));
    assert_eq!(job.metadata["b"], MetadataValue::Json(json!([1, 2, 3])));
    assert_eq!(
        serde_json::to_value(&job.metadata).unwrap(),
        json!({"a": "s", "b": [1, 2, 3]})
    );

    let stored: Vec<(String, String)> =
        sqlx::query("SELECT value, type FROM metadata WHERE job_id = 'job-1' ORDER BY key")
            .fetch_all(store.pool())
            .await
            .unwrap()
            .iter()
            .map(|row| (row.get("value"), row.get("type")))
            .collect();
    assert_eq!(
        stored,
        vec![
            ("s".to_string(), "string".to_string()),
            ("[1,2,3]".to_string(), "json".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_duplicate_job_is_rejected_and_original_untouched() {
    let store = memory_store().await;
    store.create_job(sample_job("job-1")).await.unwrap();

    let err = store
        .create_job(
            NewJob::new("job-1", "other-key", "other-type", "other-api")
                .with_metadata("a", "replaced")
                .with_metadata("c", "new"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateJob { operation: "create_job", ref job_id } if job_id == "job-1"));
    assert!(err.is_duplicate());

    let job = store.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(job.job_type, "upload");
    assert_eq!(job.job_key, "job-key");
    assert_eq!(job.metadata.len(), 2);
    assert_eq!(job.metadata["a"], MetadataValue::from("s"));
}

#[tokio::test]
async fn test_failed_metadata_insert_leaves_no_partial_job() {
    let store = memory_store().await;
    sqlx::query(
        r#"CREATE TRIGGER reject_poison BEFORE INSERT ON metadata
           WHEN NEW.key = 'poison'
           BEGIN SELECT RAISE(ABORT, 'poisoned metadata'); END"#,
    )
    .execute(store.pool())
    .await
    .unwrap();

    let err = store
        .create_job(sample_job("job-1").with_metadata("poison", "x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Storage { operation: "create_job", .. }
    ));

    assert!(store.get_job("job-1").await.unwrap().is_none());
    assert_eq!(count(&store, "metadata", "job-1").await, 0);

    // The store is still usable after the rollback.
    store.create_job(sample_job("job-2")).await.unwrap();
    assert!(store.get_job("job-2").await.unwrap().is_some());
}

#[tokio::test]
async fn test_complete_job_erases_api_key_and_sets_finish_time() {
    let store = memory_store().await;
    store.create_job(sample_job("job-1")).await.unwrap();

    let matched = store
        .complete_job("job-1", Some(json!({"x": 1})))
        .await
        .unwrap();
    assert_eq!(matched, 1);

    let job = store.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.data, Some(json!({"x": 1})));
    assert_eq!(job.api_key, None);
    let finished = job.finished_timestamp.expect("finished timestamp set");
    assert!(finished > job.requested_timestamp);

    // Everything else survives the transition.
    assert_eq!(job.sent_data, Some(json!({"resource_id": "r1"})));
    assert_eq!(job.result_url.as_deref(), Some("http://ckan.example/callback"));
    assert_eq!(job.metadata.len(), 2);
}

#[tokio::test]
async fn test_logs_are_returned_in_timestamp_order() {
    let store = memory_store().await;
    store.create_job(sample_job("job-1")).await.unwrap();

    let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    store
        .append_log(
            "job-1",
            NewLogEntry::new("INFO", "second")
                .at(t0 + chrono::Duration::seconds(5))
                .with_source("jobs", "push_to_datastore", 42),
        )
        .await
        .unwrap();
    store
        .append_log("job-1", NewLogEntry::new("WARNING", "first").at(t0))
        .await
        .unwrap();
    store
        .append_log(
            "job-1",
            NewLogEntry::new("INFO", "third").at(t0 + chrono::Duration::seconds(5)),
        )
        .await
        .unwrap();

    let job = store.get_job("job-1").await.unwrap().unwrap();
    let messages: Vec<&str> = job.logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["first", "second", "third"]);

    assert_eq!(job.logs[0].timestamp, t0);
    assert_eq!(job.logs[0].level, "WARNING");
    assert_eq!(job.logs[0].module, None);
    assert_eq!(job.logs[1].module.as_deref(), Some("jobs"));
    assert_eq!(job.logs[1].func_name.as_deref(), Some("push_to_datastore"));
    assert_eq!(job.logs[1].lineno, Some(42));

    // Log entries nested under a job do not repeat the job id.
    let rendered = serde_json::to_value(&job.logs[0]).unwrap();
    assert!(rendered.get("job_id").is_none());
    assert_eq!(rendered["timestamp"], json!("2024-03-01T12:00:00Z"));
}

#[tokio::test]
async fn test_delete_job_cascades_to_metadata_and_logs() {
    let store = memory_store().await;
    store.create_job(sample_job("job-1")).await.unwrap();
    store.create_job(sample_job("job-2")).await.unwrap();
    store
        .append_log("job-1", NewLogEntry::new("INFO", "working"))
        .await
        .unwrap();
    store
        .append_log("job-2", NewLogEntry::new("INFO", "working"))
        .await
        .unwrap();

    assert!(store.delete_job("job-1").await.unwrap());
    assert!(!store.delete_job("job-1").await.unwrap());

    assert!(store.get_job("job-1").await.unwrap().is_none());
    assert_eq!(count(&store, "metadata", "job-1").await, 0);
    assert_eq!(count(&store, "logs", "job-1").await, 0);

    let other = store.get_job("job-2").await.unwrap().unwrap();
    assert_eq!(other.metadata.len(), 2);
    assert_eq!(other.logs.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_duplicate_creates_exactly_one_wins() {
    let tmp = TempDir::new().unwrap();
    let store = file_store(&tmp).await;

    let mut handles = Vec::new();
    for n in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .create_job(
                    NewJob::new("contested", format!("key-{n}"), format!("type-{n}"), "api")
                        .with_data(json!({"writer": n}))
                        .with_metadata("writer", json!(n)),
                )
                .await
        }));
    }

    let mut winners = Vec::new();
    for (n, handle) in handles.into_iter().enumerate() {
        match handle.await.unwrap() {
            Ok(()) => winners.push(n),
            Err(err) => assert!(err.is_duplicate(), "unexpected error: {err}"),
        }
    }
    assert_eq!(winners.len(), 1);

    let n = winners[0];
    let job = store.get_job("contested").await.unwrap().unwrap();
    assert_eq!(job.job_type, format!("type-{n}"));
    assert_eq!(job.job_key, format!("key-{n}"));
    assert_eq!(job.sent_data, Some(json!({"writer": n})));
    assert_eq!(job.metadata["writer"], MetadataValue::Json(json!(n)));
}

#[tokio::test]
async fn test_jobs_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let store = file_store(&tmp).await;
    store.create_job(sample_job("job-1")).await.unwrap();
    store.close().await;

    let reopened = file_store(&tmp).await;
    let job = reopened.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.metadata.len(), 2);
}

#[tokio::test]
async fn test_reset_then_reopen_gives_empty_store() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("jobs.db");
    let config = StoreConfig::sqlite(path.to_string_lossy()).with_allow_reset(true);

    let store = JobStore::open(config.clone()).await.unwrap();
    store.create_job(sample_job("job-1")).await.unwrap();
    store.reset().await.unwrap();

    let err = store.get_job("job-1").await.unwrap_err();
    assert!(matches!(err, StoreError::Storage { operation: "get_job", .. }));
    store.close().await;

    let reopened = JobStore::open(config).await.unwrap();
    assert!(reopened.get_job("job-1").await.unwrap().is_none());
}
