use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker connect failed: {0}")]
    Connect(String),
    #[error("channel open failed: {0}")]
    Channel(String),
    #[error("queue declare failed for {0}: {1}")]
    QueueDeclare(String, String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("consume failed: {0}")]
    Consume(String),
    #[error("ack failed: {0}")]
    Ack(String),
    #[error("malformed delivery: {0}")]
    MalformedDelivery(String),
    #[error("envelope encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}
