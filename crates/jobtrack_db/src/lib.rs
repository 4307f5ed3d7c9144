//! Transactional job-record store.
//!
//! Durably records jobs, their key/value metadata and their execution logs,
//! and reconstructs a complete job record on demand.
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobtrack_db::{JobStore, NewJob, StoreConfig};
//! use serde_json::json;
//!
//! let store = JobStore::open(StoreConfig::sqlite("/var/lib/jobtrack/jobs.db")).await?;
//!
//! store
//!     .create_job(NewJob::new("job-1", "admin-key", "echo", "api-key").with_metadata("resource", "abc"))
//!     .await?;
//! store.complete_job("job-1", Some(json!({"rows": 12}))).await?;
//!
//! let record = store.get_job("job-1").await?;
//! ```

mod config;
mod error;
mod jobs;
mod schema;
mod types;

pub mod codec;

pub use codec::CodecError;
pub use config::{StoreConfig, ENV_ALLOW_RESET, ENV_DATABASE_URL, ENV_MAX_CONNECTIONS};
pub use error::{Result, StoreError};
pub use types::*;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to an initialized job store.
///
/// This is the only sanctioned way to write jobs: every operation goes
/// through it so the atomicity and encoding rules hold. Cloning is cheap and
/// clones share one connection pool.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
    config: StoreConfig,
}

impl JobStore {
    /// Connect to the configured target and create any missing tables.
    ///
    /// Fails with [`StoreError::Connection`] if the target cannot be opened
    /// or its schema cannot be created.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let connection_error = |source| StoreError::Connection {
            target: config.url.clone(),
            source,
        };

        let mut options = SqliteConnectOptions::from_str(&config.url)
            .map_err(connection_error)?
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);

        if config.is_memory() {
            // The database lives exactly as long as its one connection.
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(connection_error)?;

        let store = Self { pool, config };
        store
            .ensure_schema()
            .await
            .map_err(|source| StoreError::Connection {
                target: store.config.url.clone(),
                source,
            })?;

        info!(url = %store.config.url, "Job store opened");

        Ok(store)
    }

    /// Get the underlying connection pool.
    ///
    /// Read-only inspection only. Writes must go through the typed methods.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Close every pooled connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl JobStore {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Convert stored milliseconds to a timestamp.
    pub fn millis_to_datetime(
        millis: i64,
    ) -> std::result::Result<chrono::DateTime<chrono::Utc>, CodecError> {
        chrono::DateTime::from_timestamp_millis(millis)
            .ok_or(CodecError::TimestampOutOfRange(millis))
    }
}
