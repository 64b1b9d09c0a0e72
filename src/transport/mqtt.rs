use std::time::Duration;

use chrono::Utc;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::{
    ConnectOptions, DeliveryLevel, InboundMessage, PublishOutcome, Transport, TransportError,
    TransportKind, INBOUND_CAPACITY,
};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ACK_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 64;

/// Publish progress reported by the event loop, keyed by packet id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Written(u16),
    Acked(u16),
}

/// Matches event loop reports to publish requests. Outgoing publishes leave
/// in request order, so the n-th `Written` belongs to the n-th request; its
/// packet id then selects the `Acked` that completes a level 1 publish.
#[derive(Debug, Default)]
struct DeliveryTracker {
    requested: u64,
    written: u64,
}

#[derive(Debug)]
struct PendingPublish {
    seq: u64,
    level: DeliveryLevel,
    pkid: Option<u16>,
}

impl DeliveryTracker {
    /// Call once the request has been queued with the client.
    fn begin(&mut self, level: DeliveryLevel) -> PendingPublish {
        self.requested += 1;
        PendingPublish {
            seq: self.requested,
            level,
            pkid: None,
        }
    }

    fn observe(&mut self, pending: &mut PendingPublish, delivery: Delivery) -> Option<PublishOutcome> {
        match delivery {
            Delivery::Written(pkid) => {
                self.written += 1;
                if self.written != pending.seq {
                    return None;
                }
                match pending.level {
                    DeliveryLevel::AtMostOnce => Some(PublishOutcome::Sent),
                    DeliveryLevel::AtLeastOnce => {
                        pending.pkid = Some(pkid);
                        None
                    }
                }
            }
            Delivery::Acked(pkid) if pending.pkid == Some(pkid) => {
                Some(PublishOutcome::Acknowledged)
            }
            Delivery::Acked(_) => None,
        }
    }
}

struct Connection {
    client: AsyncClient,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    tracker: DeliveryTracker,
    inbound: Option<mpsc::Receiver<InboundMessage>>,
    driver: JoinHandle<()>,
}

/// MQTT 3.1.1 connection backed by `rumqttc`. The event loop runs on its
/// own task; publish waits are fed from it.
#[derive(Default)]
pub struct MqttTransport {
    connection: Option<Connection>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for MqttTransport {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options(options), REQUEST_CAPACITY);
        timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| TransportError::Timeout("CONNACK"))??;

        log::info!(
            "Connected to {}:{} over {}{} as {}",
            options.host,
            options.port,
            options.kind,
            if options.tls { "+tls" } else { "" },
            options.client_id
        );

        let (delivery_tx, deliveries) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let driver = tokio::spawn(drive(eventloop, delivery_tx, inbound_tx));

        self.connection = Some(Connection {
            client,
            deliveries,
            tracker: DeliveryTracker::default(),
            inbound: Some(inbound),
            driver,
        });
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        level: DeliveryLevel,
        retain: bool,
    ) -> Result<PublishOutcome, TransportError> {
        let connection = self.connection.as_mut().ok_or(TransportError::NotConnected)?;
        connection
            .client
            .publish(topic, qos(level), retain, payload)
            .await?;

        // Reports left over from earlier publishes that timed out are
        // consumed here too; the tracker keeps them from matching.
        let mut pending = connection.tracker.begin(level);
        let deliveries = &mut connection.deliveries;
        let tracker = &mut connection.tracker;
        let wait = async {
            loop {
                match deliveries.recv().await {
                    Some(delivery) => {
                        if let Some(outcome) = tracker.observe(&mut pending, delivery) {
                            return Ok(outcome);
                        }
                    }
                    None => return Err(TransportError::Closed),
                }
            }
        };
        timeout(ACK_TIMEOUT, wait)
            .await
            .map_err(|_| TransportError::Timeout("publish acknowledgment"))?
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        level: DeliveryLevel,
    ) -> Result<mpsc::Receiver<InboundMessage>, TransportError> {
        let connection = self.connection.as_mut().ok_or(TransportError::NotConnected)?;
        let inbound = connection
            .inbound
            .take()
            .ok_or(TransportError::AlreadySubscribed)?;
        connection.client.subscribe(topic, qos(level)).await?;
        log::info!("Subscribed to {}", topic);
        Ok(inbound)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        let Connection {
            client,
            deliveries,
            inbound,
            mut driver,
            ..
        } = connection;
        drop(inbound);

        let result = client.disconnect().await;
        drop(deliveries);

        if timeout(DISCONNECT_TIMEOUT, &mut driver).await.is_err() {
            log::warn!("MQTT event loop did not stop in time, aborting it");
            driver.abort();
        }
        log::info!("Disconnected");
        result.map_err(TransportError::from)
    }
}

fn qos(level: DeliveryLevel) -> QoS {
    match level {
        DeliveryLevel::AtMostOnce => QoS::AtMostOnce,
        DeliveryLevel::AtLeastOnce => QoS::AtLeastOnce,
    }
}

fn broker_address(options: &ConnectOptions) -> String {
    match options.kind {
        TransportKind::Tcp => options.host.clone(),
        TransportKind::Websockets => format!(
            "{}://{}:{}/mqtt",
            if options.tls { "wss" } else { "ws" },
            options.host,
            options.port
        ),
    }
}

fn mqtt_options(options: &ConnectOptions) -> MqttOptions {
    let mut mqtt = MqttOptions::new(
        options.client_id.clone(),
        broker_address(options),
        options.port,
    );
    mqtt.set_keep_alive(KEEP_ALIVE);

    if let Some(will) = &options.will {
        mqtt.set_last_will(LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            qos(will.level),
            will.retain,
        ));
    }

    match (options.kind, options.tls) {
        (TransportKind::Tcp, false) => {}
        (TransportKind::Tcp, true) => {
            mqtt.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        (TransportKind::Websockets, false) => {
            mqtt.set_transport(rumqttc::Transport::Ws);
        }
        (TransportKind::Websockets, true) => {
            mqtt.set_transport(rumqttc::Transport::wss_with_default_config());
        }
    }
    mqtt
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(TransportError::Connect(format!("{:?}", ack.code)))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(TransportError::Connect(e.to_string())),
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    deliveries: mpsc::UnboundedSender<Delivery>,
    inbound: mpsc::Sender<InboundMessage>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                    received_at: Utc::now(),
                };
                if inbound.send(message).await.is_err() {
                    log::debug!("Inbound receiver gone, dropping message on {}", publish.topic);
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                let _ = deliveries.send(Delivery::Acked(ack.pkid));
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                let _ = deliveries.send(Delivery::Written(pkid));
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if deliveries.is_closed() {
                    break;
                }
                log::warn!("MQTT connection error: {}", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
