use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    MqttConnection(#[from] rumqttc::ConnectionError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] fleetrelay_core::Error),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Stream closed by upstream: {0}")]
    StreamClosed(String),

    #[error("Stream idle: {0}")]
    StreamIdle(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
