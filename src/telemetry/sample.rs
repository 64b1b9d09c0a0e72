use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One simulated observation. The `id` is stamped by the session at emission
/// time; everything else comes from the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub id: u64,
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "alt")]
    pub altitude: f64,
    #[serde(rename = "spd")]
    pub speed: f64,
    #[serde(rename = "hdg")]
    pub heading: f64,
    #[serde(rename = "bat")]
    pub battery: f64,
    pub fix: bool,
    #[serde(rename = "ts", with = "epoch_seconds")]
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    /// Field names in wire/row order.
    pub const FIELDS: [&'static str; 9] = ["id", "lat", "lon", "alt", "spd", "hdg", "bat", "fix", "ts"];

    pub fn with_id(self, id: u64) -> Self {
        Self { id, ..self }
    }
}

/// Timestamps travel as floating point seconds since the Unix epoch,
/// microsecond resolution.
pub mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn to_secs(ts: &DateTime<Utc>) -> f64 {
        ts.timestamp_micros() as f64 / 1_000_000.0
    }

    pub fn from_secs(secs: f64) -> Option<DateTime<Utc>> {
        if !secs.is_finite() {
            return None;
        }
        DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(to_secs(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        from_secs(secs).ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", secs)))
    }
}
