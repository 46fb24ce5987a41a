use serde_json::Value;

use super::{NormalizeContext, Normalizer};
use crate::services::cdc::detector::Envelope;
use crate::services::cdc::identity::{extract_record_id, reclassify};
use crate::services::cdc::models::{as_row, CanonicalEvent, CdcOperation, Protocol};

/// `{schema, table, type: 0|1|2, data, old?}`
#[derive(Debug, Clone)]
pub struct SimpleProtocolNormalizer {
    email_update_heuristic: bool,
}

impl SimpleProtocolNormalizer {
    pub fn new(email_update_heuristic: bool) -> Self {
        Self {
            email_update_heuristic,
        }
    }
}

impl Normalizer for SimpleProtocolNormalizer {
    fn protocol(&self) -> Protocol {
        Protocol::Simple
    }

    fn normalize(
        &mut self,
        envelope: Envelope,
        _ctx: &mut NormalizeContext<'_>,
    ) -> Vec<CanonicalEvent> {
        let operation = envelope
            .payload
            .get("type")
            .and_then(Value::as_i64)
            .map(CdcOperation::from_code)
            .unwrap_or(CdcOperation::Unknown);

        let data = as_row(envelope.payload.get("data"));
        let operation = reclassify(operation, data.as_ref(), self.email_update_heuristic);

        let mut event = envelope.event(operation, Protocol::Simple);
        if operation == CdcOperation::Update {
            event.old_data = as_row(envelope.payload.get("old"));
        }
        event.record_id = data.as_ref().and_then(extract_record_id);
        event.data = data;

        vec![event]
    }
}
