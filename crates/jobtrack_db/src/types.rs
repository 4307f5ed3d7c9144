//! Job store types.
//!
//! `JobRecord` is the external shape of a job: the job row plus its metadata
//! map and ordered log entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Job status
// ============================================================================

/// Status of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "complete" => Some(Self::Complete),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Complete and error are terminal: no further transition happens.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Metadata values
// ============================================================================

/// A metadata value: either a plain string or arbitrary structured data.
///
/// Serializes transparently, so `{"a": "s", "b": [1, 2, 3]}` is the JSON form
/// of a map holding one of each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Json(Value),
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Value> for MetadataValue {
    /// JSON strings become [`MetadataValue::Text`]; everything else stays structured.
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s),
            other => Self::Json(other),
        }
    }
}

// ============================================================================
// Job creation
// ============================================================================

/// Everything needed to create a pending job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub job_key: String,
    pub job_type: String,
    pub api_key: String,
    /// Request payload, stored as `sent_data`. Defaults to `{}`.
    pub data: Value,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub result_url: Option<String>,
}

impl NewJob {
    pub fn new(
        job_id: impl Into<String>,
        job_key: impl Into<String>,
        job_type: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_key: job_key.into(),
            job_type: job_type.into(),
            api_key: api_key.into(),
            data: Value::Object(Default::default()),
            metadata: BTreeMap::new(),
            result_url: None,
        }
    }

    /// Set the request payload. `null` is stored as `{}`.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = match data {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_result_url(mut self, url: impl Into<String>) -> Self {
        self.result_url = Some(url.into());
        self
    }
}

// ============================================================================
// Logs
// ============================================================================

/// A log line to append to a job.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    /// Defaults to the time of the append.
    pub timestamp: Option<DateTime<Utc>>,
    pub message: String,
    pub level: String,
    pub module: Option<String>,
    pub func_name: Option<String>,
    pub lineno: Option<i64>,
}

impl NewLogEntry {
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            message: message.into(),
            level: level.into(),
            module: None,
            func_name: None,
            lineno: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Record where the line was emitted.
    pub fn with_source(
        mut self,
        module: impl Into<String>,
        func_name: impl Into<String>,
        lineno: i64,
    ) -> Self {
        self.module = Some(module.into());
        self.func_name = Some(func_name.into());
        self.lineno = Some(lineno);
        self
    }
}

/// A stored log line. The owning job id is implied by the enclosing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: String,
    pub module: Option<String>,
    pub func_name: Option<String>,
    pub lineno: Option<i64>,
}

// ============================================================================
// Job record
// ============================================================================

/// A fully reconstructed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub sent_data: Option<Value>,
    pub data: Option<Value>,
    pub error: Option<Value>,
    pub requested_timestamp: DateTime<Utc>,
    pub finished_timestamp: Option<DateTime<Utc>>,
    pub result_url: Option<String>,
    /// Present only while the job is pending.
    pub api_key: Option<String>,
    pub job_key: String,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub logs: Vec<LogEntry>,
}
