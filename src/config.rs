use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::session::SessionMode;
use crate::telemetry::GeoPoint;
use crate::transport::{DeliveryLevel, TransportKind};

/// Slowest emission rate; anything lower is clamped to it.
pub const MIN_RATE_HZ: f64 = 0.1;

/// Shortest emission period `period()` will ever return.
const MIN_PERIOD: Duration = Duration::from_nanos(1);

const FORBIDDEN_TOPIC_CHARS: [char; 3] = ['+', '#', '/'];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub drone: DroneConfig,
    pub publish: PublishConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub transport: TransportKind,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "test.mosquitto.org".to_string(),
            port: 1883,
            tls: false,
            transport: TransportKind::Tcp,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DroneConfig {
    pub fleet: String,
    pub id: String,
    pub origin: GeoPoint,
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            fleet: "lab".to_string(),
            id: "001".to_string(),
            origin: GeoPoint::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub rate_hz: f64,
    pub qos: DeliveryLevel,
    pub retain_battery: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            rate_hz: 5.0,
            qos: DeliveryLevel::AtMostOnce,
            retain_battery: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
    pub mode: SessionMode,
    pub data_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(600),
            mode: SessionMode::Persistence,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Invalid("broker host is empty".to_string()));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::Invalid("broker port must be non-zero".to_string()));
        }
        check_topic_segment("fleet", &self.drone.fleet)?;
        check_topic_segment("drone id", &self.drone.id)?;
        if !self.publish.rate_hz.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "publish rate {} is not a number",
                self.publish.rate_hz
            )));
        }
        if Duration::from_secs_f64(1.0 / self.publish.rate_hz.max(MIN_RATE_HZ)).is_zero() {
            return Err(ConfigError::Invalid(format!(
                "publish rate {} Hz is too high",
                self.publish.rate_hz
            )));
        }
        if self.session.duration.is_zero() {
            return Err(ConfigError::Invalid("session duration must be positive".to_string()));
        }
        Ok(())
    }

    /// Time between samples, with the rate clamped to [`MIN_RATE_HZ`]. Never
    /// zero, even for a rate `validate` would refuse.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.publish.rate_hz.max(MIN_RATE_HZ)).max(MIN_PERIOD)
    }
}

fn check_topic_segment(what: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Invalid(format!("{} is empty", what)));
    }
    if value.contains(FORBIDDEN_TOPIC_CHARS) {
        return Err(ConfigError::Invalid(format!(
            "{} {:?} contains one of {:?}",
            what, value, FORBIDDEN_TOPIC_CHARS
        )));
    }
    Ok(())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

pub fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s.trim()).map_err(|e| e.to_string())
}
