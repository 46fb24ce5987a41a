pub mod cdc;
pub mod consumer;
pub mod emitter;
pub mod kafka;
pub mod log_sink;

pub use cdc::ReconciliationEngine;
pub use consumer::{CdcEventConsumer, ChannelMessageSource, ConsumerStatus, MessageSource};
pub use emitter::OperationEmitter;
pub use kafka::KafkaMessageSource;
pub use log_sink::{EventLogRecord, JsonLinesLogSink, LogSink, MemoryLogSink, TracingLogSink};
