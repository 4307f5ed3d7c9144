//! Error types for the job store.

use thiserror::Error;

use crate::codec::CodecError;

/// Job store result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Job store errors.
///
/// Every variant raised by a job operation names the operation and the job id
/// so callers can log and decide without re-deriving context.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The storage target could not be reached or initialized.
    #[error("Cannot open job store at {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    /// A job with this id already exists.
    #[error("Job already exists ({operation}): {job_id}")]
    DuplicateJob {
        operation: &'static str,
        job_id: String,
    },

    /// A stored value does not match its declared type.
    #[error("Cannot decode {field} of job {job_id}: {source}")]
    Decode {
        job_id: String,
        field: String,
        #[source]
        source: CodecError,
    },

    /// Any other storage fault. Transactions are rolled back before this is returned.
    #[error("Storage error in {operation}{}: {source}", for_job(.job_id))]
    Storage {
        operation: &'static str,
        job_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// Invalid store configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Reset was requested against a target that does not allow it.
    #[error("Refusing to reset job store at {target}: reset is not enabled for this target")]
    ResetNotAllowed { target: String },
}

impl StoreError {
    /// Wrap a sqlx error raised while running `operation` for `job_id`.
    ///
    /// Unique violations become [`StoreError::DuplicateJob`].
    pub(crate) fn storage(operation: &'static str, job_id: &str, source: sqlx::Error) -> Self {
        if is_unique_violation(&source) {
            return Self::DuplicateJob {
                operation,
                job_id: job_id.to_string(),
            };
        }
        Self::Storage {
            operation,
            job_id: Some(job_id.to_string()),
            source,
        }
    }

    /// Wrap a sqlx error raised by a store-wide operation (schema, listing).
    pub(crate) fn store(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Storage {
            operation,
            job_id: None,
            source,
        }
    }

    pub(crate) fn decode(job_id: &str, field: impl Into<String>, source: CodecError) -> Self {
        Self::Decode {
            job_id: job_id.to_string(),
            field: field.into(),
            source,
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True if the caller may recover (e.g. report a conflict to its client).
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateJob { .. })
    }
}

fn for_job(job_id: &Option<String>) -> String {
    job_id
        .as_deref()
        .map(|id| format!(" for job {id}"))
        .unwrap_or_default()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
