use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A committed message: the unit of storage. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique within the namespace.
    pub id: Uuid,
    pub stream_name: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Gapless, 0-based position within `stream_name`.
    pub position: i64,
    /// Strictly increasing within the namespace; may have gaps.
    pub global_position: i64,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub time: DateTime<Utc>,
}

impl Message {
    /// The stream's category, a pure function of `stream_name`.
    pub fn category(&self) -> &str {
        crate::stream_name::category(&self.stream_name)
    }

    /// `metadata.correlation_stream_name`'s category, if present.
    pub fn correlation_category(&self) -> Option<&str> {
        let correlation_stream_name = self
            .metadata
            .as_ref()?
            .get("correlation_stream_name")?
            .as_str()?;
        Some(crate::stream_name::category(correlation_stream_name))
    }

    /// Wire shape for a stream read: `[id, type, position, global_position,
    /// data, metadata, time]`.
    pub fn to_stream_read_tuple(&self) -> Value {
        serde_json::json!([
            self.id,
            self.msg_type,
            self.position,
            self.global_position,
            self.data,
            self.metadata,
            self.time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        ])
    }

    /// Wire shape for a category read: `[id, stream_name, type, position,
    /// global_position, data, metadata, time]`.
    pub fn to_category_read_tuple(&self) -> Value {
        serde_json::json!([
            self.id,
            self.stream_name,
            self.msg_type,
            self.position,
            self.global_position,
            self.data,
            self.metadata,
            self.time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        ])
    }
}

/// A message not yet assigned a position, as submitted by a writer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Server-generated if omitted.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub msg_type: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl NewMessage {
    pub fn new(msg_type: impl Into<String>, data: Value) -> Self {
        NewMessage {
            id: None,
            msg_type: msg_type.into(),
            data,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

/// Message metadata. Structurally identical to `data` (nested JSON), with
/// one distinguished field, `correlation_stream_name`, used by category
/// reads' `correlation` filter.
pub type Metadata = Value;
