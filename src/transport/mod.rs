mod error;
mod loopback;
mod mqtt;
mod types;

use std::future::Future;

use tokio::sync::mpsc;

pub use error::TransportError;
pub use loopback::{LoopbackBroker, LoopbackTransport};
pub use mqtt::MqttTransport;
pub use types::{
    Announcement, ConnectOptions, DeliveryLevel, InboundMessage, PublishOutcome, TransportKind,
};

/// Capacity of the inbound channel handed out by `subscribe`.
pub const INBOUND_CAPACITY: usize = 1024;

/// One connection to a publish/subscribe broker.
pub trait Transport: Send {
    /// Connects and registers `options.will` as the last-will message.
    fn connect(
        &mut self,
        options: &ConnectOptions,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns once the outcome for `level` is known.
    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        level: DeliveryLevel,
        retain: bool,
    ) -> impl Future<Output = Result<PublishOutcome, TransportError>> + Send;

    /// Inbound messages for `topic` arrive on the returned bounded channel,
    /// which closes when the connection is torn down.
    fn subscribe(
        &mut self,
        topic: &str,
        level: DeliveryLevel,
    ) -> impl Future<Output = Result<mpsc::Receiver<InboundMessage>, TransportError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
