use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Deserialize;
use strum_macros::Display;

/// Acknowledgment strength of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "u8")]
pub enum DeliveryLevel {
    #[default]
    AtMostOnce,
    AtLeastOnce,
}

impl TryFrom<u8> for DeliveryLevel {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(DeliveryLevel::AtMostOnce),
            1 => Ok(DeliveryLevel::AtLeastOnce),
            other => Err(format!("unsupported delivery level {} (expected 0 or 1)", other)),
        }
    }
}

impl From<DeliveryLevel> for u8 {
    fn from(level: DeliveryLevel) -> Self {
        match level {
            DeliveryLevel::AtMostOnce => 0,
            DeliveryLevel::AtLeastOnce => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Tcp,
    Websockets,
}

/// What the publish wait observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the network (level 0).
    Sent,
    /// Broker acknowledged (level 1).
    Acknowledged,
}

/// A message the transport holds for late subscribers, and the last-will
/// message registered before connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub topic: String,
    pub payload: Vec<u8>,
    pub level: DeliveryLevel,
    pub retain: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub kind: TransportKind,
    pub client_id: String,
    pub will: Option<Announcement>,
}

impl ConnectOptions {
    pub fn client_id(drone_id: &str, role: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", drone_id, role, &suffix[..8])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Taken in the delivery context, not when the message is processed.
    pub received_at: DateTime<Utc>,
}
