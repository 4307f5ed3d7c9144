//! Value codec: native values <-> tagged text columns.
//!
//! Metadata values are stored as `(value, type)` text pairs. Plain strings are
//! stored verbatim under the `string` tag; anything else is serialized to JSON
//! under the `json` tag. Payload columns (`sent_data`, `data`, `error`) are
//! always JSON, whatever their shape.

use serde_json::Value;
use thiserror::Error;

use crate::types::MetadataValue;

/// Errors raised while decoding stored values.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown value type tag: {0:?}")]
    UnknownTag(String),

    #[error("unknown job status: {0:?}")]
    UnknownStatus(String),

    #[error("timestamp out of range: {0} ms")]
    TimestampOutOfRange(i64),
}

/// Type tag stored next to each metadata value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTag {
    String,
    Json,
}

impl ValueTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Json => "json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValueTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Encode a metadata value into its stored text and tag.
pub fn encode(value: &MetadataValue) -> (String, ValueTag) {
    match value {
        MetadataValue::Text(s) => (s.clone(), ValueTag::String),
        MetadataValue::Json(v) => (v.to_string(), ValueTag::Json),
    }
}

/// Decode stored text according to its tag. Inverse of [`encode`].
pub fn decode(text: &str, tag: &str) -> Result<MetadataValue, CodecError> {
    match ValueTag::parse(tag) {
        Some(ValueTag::String) => Ok(MetadataValue::Text(text.to_string())),
        Some(ValueTag::Json) => Ok(MetadataValue::Json(serde_json::from_str(text)?)),
        None => Err(CodecError::UnknownTag(tag.to_string())),
    }
}

/// Encode a payload column. Payloads are always JSON.
pub fn encode_payload(value: &Value) -> String {
    value.to_string()
}

/// Decode a nullable payload column.
pub fn decode_payload(text: Option<&str>) -> Result<Option<Value>, CodecError> {
    text.map(serde_json::from_str::<Value>).transpose().map_err(CodecError::from)
}
