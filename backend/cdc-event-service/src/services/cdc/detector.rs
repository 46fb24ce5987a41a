use serde_json::{Map, Value};
use tracing::debug;

use super::models::{
    as_row, CanonicalEvent, CdcOperation, CommitTimestamp, MessageKey, Protocol, RawMessage,
};

/// A message whose value parsed into a JSON object
#[derive(Debug, Clone)]
pub struct Envelope {
    pub key: Option<MessageKey>,
    pub payload: Map<String, Value>,
    pub partition: i32,
    pub offset: i64,
}

impl Envelope {
    /// Payload `table`, then the key's table hint, then "unknown"
    pub fn table(&self) -> String {
        self.payload
            .get("table")
            .and_then(Value::as_str)
            .or_else(|| self.key.as_ref().and_then(MessageKey::table))
            .unwrap_or("unknown")
            .to_string()
    }

    pub fn commit_timestamp(&self) -> Option<CommitTimestamp> {
        CommitTimestamp::from_payload(&self.payload)
    }

    pub fn type_tag(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }

    /// `schema`, or Canal's `database`
    pub fn schema(&self) -> Option<String> {
        ["schema", "database"]
            .iter()
            .filter_map(|field| self.payload.get(*field))
            .find_map(|v| v.as_str().map(str::to_string))
    }

    /// Skeleton event carrying the envelope's routing fields
    pub fn event(&self, operation: CdcOperation, protocol: Protocol) -> CanonicalEvent {
        CanonicalEvent {
            schema: self.schema(),
            partition: self.partition,
            offset: self.offset,
            key: self.key.clone(),
            commit_timestamp: self.commit_timestamp(),
            ..CanonicalEvent::new(self.table(), operation, protocol)
        }
    }
}

/// Outcome of classifying a raw message
#[derive(Debug, Clone)]
pub enum Detected {
    /// Terminal event produced by detection itself (parse error or control)
    Terminal(CanonicalEvent),
    Simple(Envelope),
    CanalArray(Envelope),
    SplitUpdate(Envelope),
}

/// Classify a raw message into one of the supported wire variants.
///
/// Never fails: malformed values become a `PARSE_ERROR` terminal event.
pub fn detect(message: &RawMessage) -> Detected {
    let key = message.key.as_deref().map(MessageKey::parse);

    let payload = match serde_json::from_slice::<Value>(&message.value) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            debug!(
                partition = message.partition,
                offset = message.offset,
                "CDC value is not a JSON object: {}",
                json_kind(&other)
            );
            return Detected::Terminal(CanonicalEvent::parse_error(
                key,
                message.partition,
                message.offset,
            ));
        }
        Err(e) => {
            debug!(
                partition = message.partition,
                offset = message.offset,
                "Failed to parse CDC value: {}",
                e
            );
            return Detected::Terminal(CanonicalEvent::parse_error(
                key,
                message.partition,
                message.offset,
            ));
        }
    };

    let envelope = Envelope {
        key,
        payload,
        partition: message.partition,
        offset: message.offset,
    };

    let present = |field: &str| envelope.payload.get(field).is_some_and(|v| !v.is_null());

    if present("schema") && present("table") && present("type") {
        return Detected::Simple(envelope);
    }

    if envelope.payload.get("data").is_some_and(Value::is_array) {
        return Detected::CanalArray(envelope);
    }

    if let Some(operation) = envelope.type_tag().map(CdcOperation::from_tag) {
        if operation.is_control() {
            let mut event = envelope.event(operation, Protocol::Control);
            event.data = as_row(envelope.payload.get("data"));
            return Detected::Terminal(event);
        }
    }

    Detected::SplitUpdate(envelope)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(key: Option<&str>, value: &str) -> RawMessage {
        RawMessage::new(key.map(|k| k.as_bytes().to_vec()), value, 3, 17)
    }

    #[test]
    fn test_detect_simple() {
        let msg = raw(None, r#"{"schema":"app","table":"users","type":0,"data":{"id":1}}"#);
        assert!(matches!(detect(&msg), Detected::Simple(_)));
    }

    #[test]
    fn test_null_schema_is_not_simple() {
        let msg = raw(
            None,
            r#"{"schema":null,"table":"users","type":"INSERT","data":{"id":1},"commitTs":1}"#,
        );
        assert!(matches!(detect(&msg), Detected::SplitUpdate(_)));
    }

    #[test]
    fn test_detect_canal_array() {
        let msg = raw(None, r#"{"table":"users","type":"INSERT","data":[{"id":1},{"id":2}]}"#);
        assert!(matches!(detect(&msg), Detected::CanalArray(_)));
    }

    #[test]
    fn test_detect_control() {
        let msg = raw(Some(r#"{"tbl":"orders"}"#), r#"{"type":"WATERMARK","ts":99}"#);
        match detect(&msg) {
            Detected::Terminal(event) => {
                assert_eq!(event.operation, CdcOperation::Watermark);
                assert_eq!(event.protocol, Protocol::Control);
                assert_eq!(event.table, "orders");
                assert_eq!(event.commit_timestamp, Some(CommitTimestamp::from(99)));
            }
            other => panic!("expected control event, got {:?}", other),
        }
    }

    #[test]
    fn test_detect_split_update() {
        let msg = raw(
            None,
            r#"{"table":"users","type":"DELETE","old":{"id":7},"commitTs":100}"#,
        );
        assert!(matches!(detect(&msg), Detected::SplitUpdate(_)));
    }

    #[test]
    fn test_malformed_value_is_parse_error() {
        let msg = raw(Some(r#"{"tbl":"users","rid":"7"}"#), "{not json");
        match detect(&msg) {
            Detected::Terminal(event) => {
                assert_eq!(event.operation, CdcOperation::ParseError);
                assert_eq!(event.table, "unknown");
                assert_eq!(event.partition, 3);
                assert_eq!(event.offset, 17);
                assert_eq!(event.key.as_ref().and_then(MessageKey::record_id), Some("7"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_object_value_is_parse_error() {
        let msg = raw(None, "[1,2,3]");
        assert!(matches!(
            detect(&msg),
            Detected::Terminal(CanonicalEvent {
                operation: CdcOperation::ParseError,
                ..
            })
        ));
    }

    #[test]
    fn test_table_falls_back_to_key() {
        let msg = raw(Some(r#"{"table":"accounts"}"#), r#"{"type":"INSERT","data":{"id":1}}"#);
        match detect(&msg) {
            Detected::SplitUpdate(envelope) => assert_eq!(envelope.table(), "accounts"),
            other => panic!("expected split update, got {:?}", other),
        }
    }
}
