use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("not connected")]
    NotConnected,
    #[error("client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("inbound channel already handed out")]
    AlreadySubscribed,
    #[error("connection closed")]
    Closed,
}
