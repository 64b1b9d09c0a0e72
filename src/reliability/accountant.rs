use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::stats::SessionStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
}

/// Sent/received tables for one session.
///
/// The sent table is only written by the emission loop and the received table
/// only by the inbound collector, so each sits behind its own lock. Clones
/// share the same tables.
#[derive(Debug, Clone, Default)]
pub struct Accountant {
    sent: Arc<Mutex<HashMap<u64, DateTime<Utc>>>>,
    received: Arc<Mutex<Vec<ReceivedRecord>>>,
}

impl Accountant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, id: u64, timestamp: DateTime<Utc>) {
        if lock(&self.sent).insert(id, timestamp).is_some() {
            log::debug!("Sent id {} recorded twice", id);
        }
    }

    pub fn record_received(&self, id: u64, timestamp: DateTime<Utc>) {
        lock(&self.received).push(ReceivedRecord { id, timestamp });
    }

    pub fn sent_count(&self) -> usize {
        lock(&self.sent).len()
    }

    pub fn received_count(&self) -> usize {
        lock(&self.received).len()
    }

    /// Must only be called once the emission loop and the inbound collector
    /// have both stopped.
    pub fn compute_statistics(&self, total_sent: u64) -> SessionStatistics {
        let sent = lock(&self.sent);
        let received = lock(&self.received);
        SessionStatistics::compute(total_sent, &sent, &received)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
