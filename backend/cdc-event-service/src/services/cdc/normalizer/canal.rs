use serde_json::Value;

use super::{NormalizeContext, Normalizer};
use crate::services::cdc::detector::Envelope;
use crate::services::cdc::identity::{extract_record_id, reclassify};
use crate::services::cdc::models::{as_row, CanonicalEvent, CdcOperation, Protocol};

/// `{table, type, data: [row, ...], old?: [row, ...]}`, one event per row
#[derive(Debug, Clone)]
pub struct CanalArrayNormalizer {
    email_update_heuristic: bool,
}

impl CanalArrayNormalizer {
    pub fn new(email_update_heuristic: bool) -> Self {
        Self {
            email_update_heuristic,
        }
    }
}

impl Normalizer for CanalArrayNormalizer {
    fn protocol(&self) -> Protocol {
        Protocol::CanalArray
    }

    fn normalize(
        &mut self,
        envelope: Envelope,
        _ctx: &mut NormalizeContext<'_>,
    ) -> Vec<CanonicalEvent> {
        let operation = envelope
            .type_tag()
            .map(CdcOperation::from_tag)
            .unwrap_or(CdcOperation::Unknown);

        let rows: &[Value] = match envelope.payload.get("data") {
            Some(Value::Array(rows)) => rows.as_slice(),
            _ => &[],
        };
        let old_rows: &[Value] = match envelope.payload.get("old") {
            Some(Value::Array(old)) => old.as_slice(),
            _ => &[],
        };

        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let data = as_row(Some(row));
                let row_operation =
                    reclassify(operation, data.as_ref(), self.email_update_heuristic);

                let mut event = envelope.event(row_operation, Protocol::CanalArray);
                event.old_data = as_row(old_rows.get(i));
                event.record_id = data.as_ref().and_then(extract_record_id);
                event.data = data;
                event
            })
            .collect()
    }
}
