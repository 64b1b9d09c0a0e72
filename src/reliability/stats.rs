use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::accountant::ReceivedRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub mean_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
}

impl LatencyStats {
    fn from_secs(latencies: &[f64]) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }
        let sum: f64 = latencies.iter().sum();
        Some(Self {
            samples: latencies.len(),
            mean_secs: sum / latencies.len() as f64,
            min_secs: latencies.iter().copied().fold(f64::INFINITY, f64::min),
            max_secs: latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Delivery statistics for one session.
///
/// The expected id universe is `0..total_sent`, which relies on the session
/// assigning identifiers sequentially from zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatistics {
    pub total_sent: u64,
    pub total_received: usize,
    pub missing_ids: Vec<u64>,
    /// Received multiplicity of every id seen more than once.
    pub duplicates: BTreeMap<u64, usize>,
    /// Sum of `multiplicity - 1` over `duplicates`.
    pub duplicate_count: usize,
    /// Absent when no received record has a matching send.
    pub latency: Option<LatencyStats>,
}

impl SessionStatistics {
    pub fn compute(
        total_sent: u64,
        sent: &HashMap<u64, DateTime<Utc>>,
        received: &[ReceivedRecord],
    ) -> Self {
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for record in received {
            *counts.entry(record.id).or_default() += 1;
        }

        let missing_ids = (0..total_sent).filter(|id| !counts.contains_key(id)).collect();

        let duplicates: BTreeMap<u64, usize> = counts
            .iter()
            .filter(|&(_, &count)| count > 1)
            .map(|(&id, &count)| (id, count))
            .collect();
        let duplicate_count = duplicates.values().map(|count| count - 1).sum();

        let latencies: Vec<f64> = received
            .iter()
            .filter_map(|record| {
                let sent_at = sent.get(&record.id)?;
                let delta = record.timestamp.signed_duration_since(*sent_at);
                delta.num_microseconds().map(|us| us as f64 / 1_000_000.0)
            })
            .collect();

        Self {
            total_sent,
            total_received: received.len(),
            missing_ids,
            duplicates,
            duplicate_count,
            latency: LatencyStats::from_secs(&latencies),
        }
    }

    /// Fraction of expected ids never received.
    pub fn loss_rate(&self) -> f64 {
        if self.total_sent == 0 {
            0.0
        } else {
            self.missing_ids.len() as f64 / self.total_sent as f64
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Delivery Statistics ===");
        println!("Sent: {}", self.total_sent);
        println!("Received: {}", self.total_received);
        println!(
            "Missing: {} ({:.2}%)",
            self.missing_ids.len(),
            self.loss_rate() * 100.0
        );
        println!("Duplicates: {}", self.duplicate_count);
        if self.duplicate_count > 0 {
            println!("Duplicate ids (id: count): {:?}", self.duplicates);
        }
        match &self.latency {
            Some(latency) => {
                println!("Latency mean: {:.4}s", latency.mean_secs);
                println!("Latency min: {:.4}s", latency.min_secs);
                println!("Latency max: {:.4}s", latency.max_secs);
            }
            None => println!("Latency: n/a"),
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sent_table(ids: std::ops::Range<u64>, at: DateTime<Utc>) -> HashMap<u64, DateTime<Utc>> {
        ids.map(|id| (id, at + Duration::milliseconds(id as i64 * 200)))
            .collect()
    }

    fn received(ids: &[u64], sent: &HashMap<u64, DateTime<Utc>>, base: DateTime<Utc>) -> Vec<ReceivedRecord> {
        ids.iter()
            .map(|&id| ReceivedRecord {
                id,
                timestamp: sent.get(&id).copied().unwrap_or(base) + Duration::milliseconds(15),
            })
            .collect()
    }

    #[test]
    fn reports_missing_and_duplicate_ids() {
        let t0 = Utc::now();
        let sent = sent_table(0..10, t0);
        let recv = received(&[0, 1, 1, 2, 4, 4, 4, 9], &sent, t0);

        let stats = SessionStatistics::compute(10, &sent, &recv);
        assert_eq!(stats.total_sent, 10);
        assert_eq!(stats.total_received, 8);
        assert_eq!(stats.missing_ids, vec![3, 5, 6, 7, 8]);
        assert_eq!(stats.duplicates, BTreeMap::from([(1, 2), (4, 3)]));
        assert_eq!(stats.duplicate_count, 3);
        assert!((stats.loss_rate() - 0.5).abs() < 1e-12);

        let latency = stats.latency.unwrap();
        assert_eq!(latency.samples, 8);
        assert!((latency.mean_secs - 0.015).abs() < 1e-9);
        assert!((latency.min_secs - 0.015).abs() < 1e-9);
        assert!((latency.max_secs - 0.015).abs() < 1e-9);
    }

    #[test]
    fn nothing_received_means_everything_missing_and_no_latency() {
        let sent = sent_table(0..4, Utc::now());
        let stats = SessionStatistics::compute(4, &sent, &[]);
        assert_eq!(stats.missing_ids, vec![0, 1, 2, 3]);
        assert_eq!(stats.duplicate_count, 0);
        assert!(stats.duplicates.is_empty());
        assert!(stats.latency.is_none());
    }

    #[test]
    fn empty_session() {
        let stats = SessionStatistics::compute(0, &HashMap::new(), &[]);
        assert!(stats.missing_ids.is_empty());
        assert_eq!(stats.loss_rate(), 0.0);
        assert!(stats.latency.is_none());
    }

    #[test]
    fn receipts_without_send_are_excluded_from_latency() {
        let t0 = Utc::now();
        let sent = sent_table(0..2, t0);
        let recv = received(&[0, 1, 7, 8], &sent, t0);

        let stats = SessionStatistics::compute(2, &sent, &recv);
        assert!(stats.missing_ids.is_empty());
        assert_eq!(stats.total_received, 4);
        assert_eq!(stats.latency.unwrap().samples, 2);
    }

    #[test]
    fn missing_and_received_partition_the_universe() {
        let mut rng = StdRng::seed_from_u64(0xD20);
        for _ in 0..50 {
            let total: u64 = rng.gen_range(0..200);
            let t0 = Utc::now();
            let sent = sent_table(0..total, t0);
            let mut ids = Vec::new();
            for id in 0..total {
                // 0 = lost, 1 = delivered, 2..=3 = duplicated
                for _ in 0..rng.gen_range(0..=3) {
                    ids.push(id);
                }
            }
            let recv: Vec<ReceivedRecord> = ids
                .iter()
                .map(|&id| ReceivedRecord {
                    id,
                    timestamp: sent[&id] + Duration::microseconds(rng.gen_range(0..500_000)),
                })
                .collect();

            let stats = SessionStatistics::compute(total, &sent, &recv);

            let mut multiplicity: HashMap<u64, usize> = HashMap::new();
            for id in &ids {
                *multiplicity.entry(*id).or_default() += 1;
            }
            for id in 0..total {
                let is_missing = stats.missing_ids.contains(&id);
                assert_ne!(is_missing, multiplicity.contains_key(&id), "id {}", id);
            }
            assert_eq!(
                stats.missing_ids.len() + multiplicity.len(),
                total as usize
            );

            let expected_dups: usize = multiplicity.values().map(|m| m - 1).sum();
            assert_eq!(stats.duplicate_count, expected_dups);
            assert_eq!(stats.duplicate_count == 0, multiplicity.values().all(|&m| m <= 1));

            if let Some(latency) = &stats.latency {
                assert_eq!(latency.samples, recv.len());
                assert!(latency.min_secs.is_finite() && latency.min_secs >= 0.0);
                assert!(latency.max_secs.is_finite() && latency.max_secs < 0.5);
                assert!(latency.min_secs <= latency.mean_secs + 1e-9);
                assert!(latency.mean_secs <= latency.max_secs + 1e-9);
            } else {
                assert!(recv.is_empty());
            }
        }
    }
}
