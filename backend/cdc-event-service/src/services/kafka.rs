use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::error::{CdcError, Result};
use crate::services::cdc::RawMessage;
use crate::services::consumer::MessageSource;

/// Kafka-backed [`MessageSource`]; offsets are auto-committed
pub struct KafkaMessageSource {
    consumer: StreamConsumer,
}

impl KafkaMessageSource {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        info!("Initializing Kafka message source with config: {:?}", config);

        if config.topics.is_empty() {
            return Err(CdcError::Config("no CDC topics configured".to_string()));
        }

        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "5000")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| {
                error!("Failed to create Kafka consumer: {}", e);
                CdcError::Kafka(e.to_string())
            })?;

        consumer
            .subscribe(&config.topics.iter().map(|s| s.as_str()).collect::<Vec<_>>())
            .map_err(|e| {
                error!("Failed to subscribe to topics: {}", e);
                CdcError::Kafka(e.to_string())
            })?;

        info!("Subscribed to CDC topics: {:?}", config.topics);

        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    async fn recv(&mut self) -> Result<Option<RawMessage>> {
        let msg = self.consumer.recv().await?;

        debug!(
            topic = msg.topic(),
            partition = msg.partition(),
            offset = msg.offset(),
            "Received Kafka message"
        );

        // A tombstone carries no value; it reaches the engine as an empty payload
        Ok(Some(RawMessage::new(
            msg.key().map(<[u8]>::to_vec),
            msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            msg.partition(),
            msg.offset(),
        )))
    }
}
