use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::mpsc;

use super::{
    Announcement, ConnectOptions, DeliveryLevel, InboundMessage, PublishOutcome, Transport,
    TransportError, INBOUND_CAPACITY,
};

struct Subscription {
    owner: u64,
    topic: String,
    tx: mpsc::Sender<InboundMessage>,
}

#[derive(Default)]
struct BrokerState {
    subscriptions: Vec<Subscription>,
    retained: HashMap<String, Vec<u8>>,
    wills: HashMap<u64, Announcement>,
}

/// In-process broker with exact topic matching and retained messages.
/// Used for offline runs and tests.
#[derive(Clone, Default)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
    next_client: Arc<AtomicU64>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            broker: self.clone(),
            client: self.next_client.fetch_add(1, Ordering::Relaxed),
            connected: false,
        }
    }

    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.lock().retained.get(topic).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn route(&self, topic: &str, payload: &[u8], retain: bool) -> Vec<mpsc::Sender<InboundMessage>> {
        let mut state = self.lock();
        if retain {
            if payload.is_empty() {
                state.retained.remove(topic);
            } else {
                state.retained.insert(topic.to_string(), payload.to_vec());
            }
        }
        state.subscriptions.retain(|s| !s.tx.is_closed());
        state
            .subscriptions
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| s.tx.clone())
            .collect()
    }

    fn release(&self, client: u64, publish_will: bool) {
        let will = {
            let mut state = self.lock();
            state.subscriptions.retain(|s| s.owner != client);
            state.wills.remove(&client)
        };
        if let Some(will) = will.filter(|_| publish_will) {
            let message = InboundMessage {
                topic: will.topic.clone(),
                payload: will.payload.clone(),
                received_at: Utc::now(),
            };
            for tx in self.route(&will.topic, &will.payload, will.retain) {
                let _ = tx.try_send(message.clone());
            }
        }
    }
}

/// One client connection to a [`LoopbackBroker`]. Dropping it while connected
/// behaves like a lost connection and fires the last-will message.
pub struct LoopbackTransport {
    broker: LoopbackBroker,
    client: u64,
    connected: bool,
}

impl Transport for LoopbackTransport {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError> {
        if let Some(will) = &options.will {
            self.broker.lock().wills.insert(self.client, will.clone());
        }
        self.connected = true;
        log::debug!("Loopback client {} connected as {}", self.client, options.client_id);
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        level: DeliveryLevel,
        retain: bool,
    ) -> Result<PublishOutcome, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        let subscribers = self.broker.route(topic, &payload, retain);
        let message = InboundMessage {
            topic: topic.to_string(),
            payload,
            received_at: Utc::now(),
        };
        for tx in subscribers {
            let _ = tx.send(message.clone()).await;
        }

        Ok(match level {
            DeliveryLevel::AtMostOnce => PublishOutcome::Sent,
            DeliveryLevel::AtLeastOnce => PublishOutcome::Acknowledged,
        })
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        _level: DeliveryLevel,
    ) -> Result<mpsc::Receiver<InboundMessage>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let mut state = self.broker.lock();
        if let Some(payload) = state.retained.get(topic) {
            let _ = tx.try_send(InboundMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
                received_at: Utc::now(),
            });
        }
        state.subscriptions.push(Subscription {
            owner: self.client,
            topic: topic.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            self.connected = false;
            self.broker.release(self.client, false);
        }
        Ok(())
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        if self.connected {
            self.broker.release(self.client, true);
        }
    }
}
