//! Schema creation and teardown for the job store.
//!
//! All CREATE TABLE statements live here. Table and column names are read by
//! other processes sharing the database, so they do not change.

use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::JobStore;

/// Tables in drop order (children before parents).
const TABLES: [&str; 3] = ["logs", "metadata", "jobs"];

impl JobStore {
    /// Ensure all tables and indexes exist. Safe to run against an initialized target.
    pub(crate) async fn ensure_schema(&self) -> std::result::Result<(), sqlx::Error> {
        // Jobs: one row per job, keyed by the caller-supplied id
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY NOT NULL,
                job_type TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT,
                error TEXT,
                requested_timestamp INTEGER NOT NULL,
                finished_timestamp INTEGER,
                sent_data TEXT,
                result_url TEXT,
                api_key TEXT,
                job_key TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Metadata: tagged key/value pairs, unique per job
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS metadata (
                job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                type TEXT NOT NULL,
                PRIMARY KEY (job_id, key)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Logs: append-only, not uniquely keyed
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS logs (
                job_id TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
                timestamp INTEGER NOT NULL,
                message TEXT,
                level TEXT,
                module TEXT,
                "funcName" TEXT,
                lineno INTEGER
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_metadata_value ON metadata(value)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_job ON logs(job_id, timestamp)")
            .execute(&self.pool)
            .await?;

        info!("Job store schema verified");
        Ok(())
    }

    /// Drop every job store table and all rows in them.
    ///
    /// For test harnesses only. Never run this against a database other
    /// processes rely on: it is refused with [`StoreError::ResetNotAllowed`]
    /// unless the config opts in (in-memory targets always do).
    pub async fn reset(&self) -> Result<()> {
        if !self.config.allow_reset {
            return Err(StoreError::ResetNotAllowed {
                target: self.config.url.clone(),
            });
        }

        warn!(target_url = %self.config.url, "Dropping all job store tables");
        for table in TABLES {
            sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::store("reset", e))?;
        }

        Ok(())
    }
}
