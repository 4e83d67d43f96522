use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker unreachable, url={0}")]
    Connection(String),
    #[error("acknowledge failed, message_id={0}")]
    Ack(String),
    #[error("close failed, subscription={0}")]
    Close(String),
    #[error("connection close failed: {0}")]
    ConnectionClose(String),
    #[error("publish failed, topic={0}")]
    Publish(String),
}
