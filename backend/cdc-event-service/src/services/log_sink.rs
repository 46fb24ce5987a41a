//! Destinations for the structured record written per canonical event.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::error::{CdcError, Result};
use crate::services::cdc::CanonicalEvent;

/// One log record: every canonical event field plus the capture time
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogRecord {
    #[serde(flatten)]
    pub event: CanonicalEvent,
    /// ISO-8601 capture timestamp
    pub captured_at: DateTime<Utc>,
}

impl EventLogRecord {
    pub fn new(event: &CanonicalEvent) -> Self {
        Self {
            event: event.clone(),
            captured_at: Utc::now(),
        }
    }
}

pub trait LogSink: Send + Sync {
    fn append(&self, record: &EventLogRecord) -> Result<()>;
}

/// Writes each record as JSON on the `cdc_events` tracing target
#[derive(Debug, Default, Clone)]
pub struct TracingLogSink;

impl TracingLogSink {
    pub fn new() -> Self {
        Self
    }
}

impl LogSink for TracingLogSink {
    fn append(&self, record: &EventLogRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        info!(
            target: "cdc_events",
            table = %record.event.table,
            operation = %record.event.operation,
            partition = record.event.partition,
            offset = record.event.offset,
            record = %json,
            "cdc event"
        );
        Ok(())
    }
}

/// Appends newline-delimited JSON records to a file
pub struct JsonLinesLogSink {
    writer: Mutex<LineWriter<File>>,
}

impl JsonLinesLogSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened CDC event log");
        Ok(Self {
            writer: Mutex::new(LineWriter::new(file)),
        })
    }
}

impl LogSink for JsonLinesLogSink {
    fn append(&self, record: &EventLogRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| CdcError::Internal("event log writer poisoned".to_string()))?;
        writer.write_all(&line)?;
        Ok(())
    }
}

/// Keeps records in memory; cloning shares the same buffer
#[derive(Debug, Default, Clone)]
pub struct MemoryLogSink {
    records: Arc<Mutex<Vec<EventLogRecord>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventLogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<CanonicalEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, record: &EventLogRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| CdcError::Internal("memory sink poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cdc::{CdcOperation, Protocol};
    use std::io::{BufRead, BufReader};

    fn event() -> CanonicalEvent {
        let mut event = CanonicalEvent::new("users", CdcOperation::Insert, Protocol::SplitUpdate);
        event.partition = 1;
        event.offset = 99;
        event
    }

    #[test]
    fn test_record_flattens_event_fields() {
        let record = EventLogRecord::new(&event());
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["table"], "users");
        assert_eq!(value["operation"], "INSERT");
        assert_eq!(value["offset"], 99);
        let captured = value["capturedAt"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(captured).is_ok());
    }

    #[test]
    fn test_json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let sink = JsonLinesLogSink::open(&path).unwrap();
        sink.append(&EventLogRecord::new(&event())).unwrap();
        sink.append(&EventLogRecord::new(&event())).unwrap();
        drop(sink);

        let lines: Vec<String> = BufReader::new(File::open(&path).unwrap())
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(parsed["protocol"], "split_update");
    }

    #[test]
    fn test_memory_sink_shares_buffer() {
        let sink = MemoryLogSink::new();
        let handle = sink.clone();
        sink.append(&EventLogRecord::new(&event())).unwrap();
        assert_eq!(handle.len(), 1);
        assert_eq!(handle.events()[0].table, "users");
    }
}
