use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Ordered row image (field -> value)
pub type RowImage = Map<String, Value>;

/// Raw message as handed over by the transport, one per partition offset
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

impl RawMessage {
    pub fn new(
        key: Option<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        partition: i32,
        offset: i64,
    ) -> Self {
        Self {
            key,
            value: value.into(),
            partition,
            offset,
        }
    }
}

/// Canonical operation tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CdcOperation {
    Insert,
    Update,
    Delete,
    Watermark,
    Bootstrap,
    Unknown,
    ParseError,
}

impl CdcOperation {
    /// Simple-protocol integer tag
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Insert,
            1 => Self::Update,
            2 => Self::Delete,
            _ => Self::Unknown,
        }
    }

    /// String tag used by the Canal-Array and Split-Update variants
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_uppercase().as_str() {
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "WATERMARK" => Self::Watermark,
            "BOOTSTRAP" => Self::Bootstrap,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Watermark => "WATERMARK",
            Self::Bootstrap => "BOOTSTRAP",
            Self::Unknown => "UNKNOWN",
            Self::ParseError => "PARSE_ERROR",
        }
    }

    /// Metric label value
    pub fn label(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }

    /// Control messages mark stream progress, not row mutations
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Watermark | Self::Bootstrap)
    }
}

impl fmt::Display for CdcOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which normalizer produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Simple,
    CanalArray,
    SplitUpdate,
    Control,
    Invalid,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::CanalArray => "canal_array",
            Self::SplitUpdate => "split_update",
            Self::Control => "control",
            Self::Invalid => "invalid",
        }
    }
}

/// Transaction commit timestamp, compared only for equality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitTimestamp(pub Value);

impl CommitTimestamp {
    /// `commitTs`, then `ts`, then `es`; null means absent
    pub fn from_payload(payload: &Map<String, Value>) -> Option<Self> {
        ["commitTs", "ts", "es"]
            .iter()
            .filter_map(|field| payload.get(*field))
            .find(|v| !v.is_null())
            .map(|v| Self(v.clone()))
    }
}

impl fmt::Display for CommitTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<i64> for CommitTimestamp {
    fn from(ts: i64) -> Self {
        Self(Value::from(ts))
    }
}

/// Message key: parsed routing hints, or the raw bytes when not JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageKey {
    Parsed {
        #[serde(skip_serializing_if = "Option::is_none")]
        table: Option<String>,
        #[serde(rename = "recordId", skip_serializing_if = "Option::is_none")]
        record_id: Option<String>,
        raw: Value,
    },
    Opaque(String),
}

impl MessageKey {
    /// Parse failure is non-fatal: the key is kept as an opaque string
    pub fn parse(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(raw) => {
                let table = first_string(&raw, &["tbl", "table"]);
                let record_id = first_string(&raw, &["rid", "rowid"]);
                Self::Parsed {
                    table,
                    record_id,
                    raw,
                }
            }
            Err(_) => Self::Opaque(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Parsed { table, .. } => table.as_deref(),
            Self::Opaque(_) => None,
        }
    }

    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::Parsed { record_id, .. } => record_id.as_deref(),
            Self::Opaque(_) => None,
        }
    }
}

fn first_string(value: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|field| value.get(*field))
        .find_map(scalar_to_string)
}

/// Render a scalar JSON value as an identity string
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The unit the engine produces: one per terminal outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub table: String,
    pub schema: Option<String>,
    pub operation: CdcOperation,
    pub data: Option<RowImage>,
    pub old_data: Option<RowImage>,
    pub record_id: Option<String>,
    pub commit_timestamp: Option<CommitTimestamp>,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<MessageKey>,
    pub protocol: Protocol,
}

impl CanonicalEvent {
    pub fn new(table: impl Into<String>, operation: CdcOperation, protocol: Protocol) -> Self {
        Self {
            table: table.into(),
            schema: None,
            operation,
            data: None,
            old_data: None,
            record_id: None,
            commit_timestamp: None,
            partition: 0,
            offset: 0,
            key: None,
            protocol,
        }
    }

    /// Event for a message whose value could not be parsed
    pub fn parse_error(key: Option<MessageKey>, partition: i32, offset: i64) -> Self {
        Self {
            partition,
            offset,
            key,
            ..Self::new("unknown", CdcOperation::ParseError, Protocol::Invalid)
        }
    }
}

/// Convert a JSON value into a row image when it is an object
pub(crate) fn as_row(value: Option<&Value>) -> Option<RowImage> {
    match value {
        Some(Value::Object(map)) => Some(map.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_codes() {
        assert_eq!(CdcOperation::from_code(0), CdcOperation::Insert);
        assert_eq!(CdcOperation::from_code(1), CdcOperation::Update);
        assert_eq!(CdcOperation::from_code(2), CdcOperation::Delete);
        assert_eq!(CdcOperation::from_code(7), CdcOperation::Unknown);
        assert_eq!(CdcOperation::from_tag("delete"), CdcOperation::Delete);
        assert_eq!(CdcOperation::from_tag("TRUNCATE"), CdcOperation::Unknown);
        assert_eq!(CdcOperation::ParseError.label(), "parse_error");
    }

    #[test]
    fn test_key_parsing_prefers_first_alias() {
        let key = MessageKey::parse(br#"{"tbl":"users","table":"ignored","rowid":42}"#);
        assert_eq!(key.table(), Some("users"));
        assert_eq!(key.record_id(), Some("42"));
    }

    #[test]
    fn test_key_parse_failure_is_opaque() {
        let key = MessageKey::parse(b"users:42");
        assert_eq!(key, MessageKey::Opaque("users:42".to_string()));
        assert_eq!(key.table(), None);
    }

    #[test]
    fn test_commit_timestamp_lookup_order() {
        let payload = json!({"commitTs": 100, "ts": 5});
        let ts = CommitTimestamp::from_payload(payload.as_object().unwrap());
        assert_eq!(ts, Some(CommitTimestamp::from(100)));

        let payload = json!({"commitTs": null, "ts": "lsn-9"});
        let ts = CommitTimestamp::from_payload(payload.as_object().unwrap()).unwrap();
        assert_eq!(ts.to_string(), "lsn-9");
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let mut event = CanonicalEvent::new("users", CdcOperation::Update, Protocol::SplitUpdate);
        event.record_id = Some("7".to_string());
        event.commit_timestamp = Some(CommitTimestamp::from(100));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["operation"], "UPDATE");
        assert_eq!(value["recordId"], "7");
        assert_eq!(value["commitTimestamp"], 100);
        assert_eq!(value["protocol"], "split_update");
    }
}
