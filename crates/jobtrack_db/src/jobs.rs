//! Job lifecycle operations: create, finish, fetch, log, delete.

use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::{debug, warn};

use crate::codec::{self, CodecError};
use crate::error::{Result, StoreError};
use crate::types::*;
use crate::JobStore;

const SELECT_JOB: &str = r#"
    SELECT job_id, job_type, status, data, error, requested_timestamp,
           finished_timestamp, sent_data, result_url, api_key, job_key
    FROM jobs WHERE job_id = ?
"#;

const COMPLETE_JOB: &str = r#"
    UPDATE jobs SET
        status = ?,
        finished_timestamp = COALESCE(finished_timestamp, MAX(?, requested_timestamp + 1)),
        api_key = NULL,
        data = ?,
        error = NULL
    WHERE job_id = ?
"#;

const FAIL_JOB: &str = r#"
    UPDATE jobs SET
        status = ?,
        finished_timestamp = COALESCE(finished_timestamp, MAX(?, requested_timestamp + 1)),
        api_key = NULL,
        data = NULL,
        error = ?
    WHERE job_id = ?
"#;

impl JobStore {
    // ========================================================================
    // Writes
    // ========================================================================

    /// Create a pending job together with its metadata, atomically.
    ///
    /// Either the job row and every metadata row become visible, or none do.
    /// A second job with the same id fails with [`StoreError::DuplicateJob`];
    /// the existing job is left untouched.
    pub async fn create_job(&self, job: NewJob) -> Result<()> {
        let job_id = job.job_id.as_str();
        let storage = |e| StoreError::storage("create_job", job_id, e);

        let mut tx = self.pool.begin().await.map_err(storage)?;

        match insert_job(&mut *tx, &job, Self::now_millis()).await {
            Ok(()) => tx.commit().await.map_err(storage)?,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(job_id, error = %rollback_err, "create_job rollback failed");
                }
                debug!(job_id, error = %e, "create_job rolled back");
                return Err(storage(e));
            }
        }

        debug!(
            job_id,
            job_type = %job.job_type,
            metadata = job.metadata.len(),
            "Job created"
        );
        Ok(())
    }

    /// Mark a job complete, store its result and erase its API key.
    ///
    /// Clears any error detail left by an earlier failure. Returns the number
    /// of rows matched; an unknown id matches zero rows and is not an error.
    /// The finish time is always after the request time, and the finish time
    /// of an already terminal job is kept.
    pub async fn complete_job(&self, job_id: &str, data: Option<Value>) -> Result<u64> {
        let payload = data.as_ref().map(codec::encode_payload);
        self.finish_job("complete_job", COMPLETE_JOB, job_id, JobStatus::Complete, payload)
            .await
    }

    /// Mark a job failed, store its error detail and erase its API key.
    ///
    /// Clears any result left by an earlier completion. Same matching and
    /// finish time rules as [`JobStore::complete_job`].
    pub async fn fail_job(&self, job_id: &str, error: Value) -> Result<u64> {
        let payload = Some(codec::encode_payload(&error));
        self.finish_job("fail_job", FAIL_JOB, job_id, JobStatus::Error, payload)
            .await
    }

    async fn finish_job(
        &self,
        operation: &'static str,
        sql: &str,
        job_id: &str,
        status: JobStatus,
        payload: Option<String>,
    ) -> Result<u64> {
        let result = sqlx::query(sql)
            .bind(status.as_str())
            .bind(Self::now_millis())
            .bind(payload)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::storage(operation, job_id, e))?;

        let matched = result.rows_affected();
        if matched == 0 {
            warn!(job_id, operation, "No job matched");
        } else {
            debug!(job_id, %status, "Job finished");
        }
        Ok(matched)
    }

    /// Append a log line to a job. Fails if the job does not exist.
    pub async fn append_log(&self, job_id: &str, entry: NewLogEntry) -> Result<()> {
        let timestamp = entry
            .timestamp
            .map(|t| t.timestamp_millis())
            .unwrap_or_else(Self::now_millis);

        sqlx::query(
            r#"
            INSERT INTO logs (job_id, timestamp, message, level, module, "funcName", lineno)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(timestamp)
        .bind(&entry.message)
        .bind(&entry.level)
        .bind(&entry.module)
        .bind(&entry.func_name)
        .bind(entry.lineno)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::storage("append_log", job_id, e))?;

        Ok(())
    }

    /// Delete a job. Its metadata and logs go with it.
    ///
    /// Returns whether a job was deleted.
    pub async fn delete_job(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::storage("delete_job", job_id, e))?;

        let deleted = result.rows_affected() > 0;
        debug!(job_id, deleted, "Job delete");
        Ok(deleted)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Fetch a job with its metadata and logs.
    ///
    /// Returns `Ok(None)` if no such job exists. The three underlying reads
    /// are not one snapshot; a concurrent completion may land between them.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let storage = |e| StoreError::storage("get_job", job_id, e);

        let row = sqlx::query(SELECT_JOB)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut record = row_to_record(job_id, &row)?;
        record.metadata = self.get_metadata(job_id).await?;
        record.logs = self.get_logs(job_id).await?;

        Ok(Some(record))
    }

    /// Ids of jobs in `status`, oldest request first.
    pub async fn list_job_ids(&self, status: JobStatus) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT job_id FROM jobs WHERE status = ? ORDER BY requested_timestamp ASC, rowid ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::store("list_job_ids", e))?;

        rows.iter()
            .map(|row| row.try_get("job_id"))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| StoreError::store("list_job_ids", e))
    }

    async fn get_metadata(&self, job_id: &str) -> Result<BTreeMap<String, MetadataValue>> {
        let storage = |e| StoreError::storage("get_job", job_id, e);

        let rows = sqlx::query("SELECT key, value, type FROM metadata WHERE job_id = ?")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        let mut metadata = BTreeMap::new();
        for row in rows {
            let key: String = row.try_get("key").map_err(storage)?;
            let value: String = row.try_get("value").map_err(storage)?;
            let tag: String = row.try_get("type").map_err(storage)?;

            let decoded = codec::decode(&value, &tag)
                .map_err(|e| StoreError::decode(job_id, format!("metadata[{key}]"), e))?;
            metadata.insert(key, decoded);
        }
        Ok(metadata)
    }

    async fn get_logs(&self, job_id: &str) -> Result<Vec<LogEntry>> {
        let storage = |e| StoreError::storage("get_job", job_id, e);

        let rows = sqlx::query(
            r#"
            SELECT timestamp, message, level, module, "funcName", lineno
            FROM logs WHERE job_id = ?
            ORDER BY timestamp ASC, rowid ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(|row| row_to_log(job_id, row)).collect()
    }
}

async fn insert_job(conn: &mut SqliteConnection, job: &NewJob, now: i64) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO jobs (job_id, job_type, status, requested_timestamp, sent_data,
                          result_url, api_key, job_key)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&job.job_id)
    .bind(&job.job_type)
    .bind(JobStatus::Pending.as_str())
    .bind(now)
    .bind(codec::encode_payload(&job.data))
    .bind(&job.result_url)
    .bind(&job.api_key)
    .bind(&job.job_key)
    .execute(&mut *conn)
    .await?;

    for (key, value) in &job.metadata {
        let (text, tag) = codec::encode(value);
        sqlx::query("INSERT INTO metadata (job_id, key, value, type) VALUES (?, ?, ?, ?)")
            .bind(&job.job_id)
            .bind(key)
            .bind(text)
            .bind(tag.as_str())
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

fn row_to_record(job_id: &str, row: &SqliteRow) -> Result<JobRecord> {
    let storage = |e| StoreError::storage("get_job", job_id, e);
    let payload = |field: &str| -> Result<Option<Value>> {
        let text: Option<String> = row.try_get(field).map_err(storage)?;
        codec::decode_payload(text.as_deref()).map_err(|e| StoreError::decode(job_id, field, e))
    };

    let status: String = row.try_get("status").map_err(storage)?;
    let status = JobStatus::parse(&status).ok_or_else(|| {
        StoreError::decode(job_id, "status", CodecError::UnknownStatus(status.clone()))
    })?;

    let timestamp = |field: &str, ms: i64| {
        JobStore::millis_to_datetime(ms).map_err(|e| StoreError::decode(job_id, field, e))
    };

    let requested: i64 = row.try_get("requested_timestamp").map_err(storage)?;
    let finished: Option<i64> = row.try_get("finished_timestamp").map_err(storage)?;

    Ok(JobRecord {
        job_id: row.try_get("job_id").map_err(storage)?,
        job_type: row.try_get("job_type").map_err(storage)?,
        status,
        sent_data: payload("sent_data")?,
        data: payload("data")?,
        error: payload("error")?,
        requested_timestamp: timestamp("requested_timestamp", requested)?,
        finished_timestamp: finished
            .map(|ms| timestamp("finished_timestamp", ms))
            .transpose()?,
        result_url: row.try_get("result_url").map_err(storage)?,
        api_key: row.try_get("api_key").map_err(storage)?,
        job_key: row.try_get("job_key").map_err(storage)?,
        metadata: BTreeMap::new(),
        logs: Vec::new(),
    })
}

fn row_to_log(job_id: &str, row: &SqliteRow) -> Result<LogEntry> {
    let storage = |e| StoreError::storage("get_job", job_id, e);

    let timestamp: i64 = row.try_get("timestamp").map_err(storage)?;
    Ok(LogEntry {
        timestamp: JobStore::millis_to_datetime(timestamp)
            .map_err(|e| StoreError::decode(job_id, "logs.timestamp", e))?,
        message: row
            .try_get::<Option<String>, _>("message")
            .map_err(storage)?
            .unwrap_or_default(),
        level: row
            .try_get::<Option<String>, _>("level")
            .map_err(storage)?
            .unwrap_or_default(),
        module: row.try_get("module").map_err(storage)?,
        func_name: row.try_get("funcName").map_err(storage)?,
        lineno: row.try_get("lineno").map_err(storage)?,
    })
}
