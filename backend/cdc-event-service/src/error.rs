use thiserror::Error;

pub type Result<T> = std::result::Result<T, CdcError>;

#[derive(Debug, Error)]
pub enum CdcError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Kafka error: {0}")]
    Kafka(String),

    #[error("Event sink error: {0}")]
    Sink(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rdkafka::error::KafkaError> for CdcError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        CdcError::Kafka(err.to_string())
    }
}

impl From<envy::Error> for CdcError {
    fn from(err: envy::Error) -> Self {
        CdcError::Config(err.to_string())
    }
}
