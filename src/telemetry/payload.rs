use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sample::{epoch_seconds, TelemetrySample};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AltitudePayload {
    pub id: u64,
    pub alt: f64,
    #[serde(with = "epoch_seconds")]
    pub ts: DateTime<Utc>,
}

impl From<&TelemetrySample> for AltitudePayload {
    fn from(sample: &TelemetrySample) -> Self {
        Self {
            id: sample.id,
            alt: sample.altitude,
            ts: sample.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryPayload {
    pub id: u64,
    pub bat: f64,
    #[serde(with = "epoch_seconds")]
    pub ts: DateTime<Utc>,
}

impl From<&TelemetrySample> for BatteryPayload {
    fn from(sample: &TelemetrySample) -> Self {
        Self {
            id: sample.id,
            bat: sample.battery,
            ts: sample.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceAnnouncement {
    pub status: String,
}

impl PresenceAnnouncement {
    pub fn online() -> Self {
        Self {
            status: "online".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeAnnouncement {
    pub mode: String,
}

impl ModeAnnouncement {
    pub fn cruise() -> Self {
        Self {
            mode: "CRUISE".to_string(),
        }
    }
}

/// The only part of an inbound telemetry message the accountant needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct InboundId {
    pub id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcements_are_single_field_records() {
        assert_eq!(
            serde_json::to_string(&PresenceAnnouncement::online()).unwrap(),
            r#"{"status":"online"}"#
        );
        assert_eq!(
            serde_json::to_string(&ModeAnnouncement::cruise()).unwrap(),
            r#"{"mode":"CRUISE"}"#
        );
    }

    #[test]
    fn inbound_id_ignores_other_fields() {
        let parsed: InboundId =
            serde_json::from_str(r#"{"id": 12, "lat": 1.0, "ts": 1700000000.5}"#).unwrap();
        assert_eq!(parsed.id, 12);
    }

    #[test]
    fn inbound_id_requires_numeric_id() {
        assert!(serde_json::from_str::<InboundId>(r#"{"lat": 1.0}"#).is_err());
        assert!(serde_json::from_str::<InboundId>(r#"{"id": "x"}"#).is_err());
        assert!(serde_json::from_slice::<InboundId>(b"offline").is_err());
    }
}
