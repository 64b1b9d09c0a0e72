use chrono::{DateTime, Utc};

pub const ROTATION_PERIOD_SECS: i64 = 300;

const FILE_PREFIX: &str = "pub_telemetry_";

/// Index of a 5 minute window since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RotationBucket(i64);

impl RotationBucket {
    pub fn of(timestamp: DateTime<Utc>) -> Self {
        Self(timestamp.timestamp().div_euclid(ROTATION_PERIOD_SECS))
    }

    pub fn index(&self) -> i64 {
        self.0
    }

    pub fn start(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0 * ROTATION_PERIOD_SECS, 0).unwrap_or_default()
    }

    /// File name without extension, e.g. `pub_telemetry_20240101_1205`.
    pub fn file_stem(&self) -> String {
        format!("{}{}", FILE_PREFIX, self.start().format("%Y%m%d_%H%M"))
    }

    pub fn matches_file_name(name: &str, extension: &str) -> bool {
        name.starts_with(FILE_PREFIX) && name.ends_with(&format!(".{}", extension))
    }
}
