use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::persist::{
    csv_row::CSV_HEADER,
    error::{PersistError, ValidationError},
    rotation::RotationBucket,
};
use crate::telemetry::TelemetrySample;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Written(RotationBucket),
    Rejected(ValidationError),
}

/// The csv/jsonl pair belonging to one rotation bucket.
struct OpenPair {
    bucket: RotationBucket,
    csv_path: PathBuf,
    jsonl_path: PathBuf,
    csv: BufWriter<File>,
    jsonl: BufWriter<File>,
}

impl OpenPair {
    fn open(dir: &Path, bucket: RotationBucket) -> Result<Self, PersistError> {
        let stem = bucket.file_stem();
        let csv_path = dir.join(format!("{}.csv", stem));
        let jsonl_path = dir.join(format!("{}.jsonl", stem));

        let csv_file = OpenOptions::new().create(true).append(true).open(&csv_path)?;
        let needs_header = csv_file.metadata()?.len() == 0;
        let mut csv = BufWriter::new(csv_file);
        if needs_header {
            writeln!(csv, "{}", CSV_HEADER)?;
            csv.flush()?;
        }

        let jsonl = BufWriter::new(OpenOptions::new().create(true).append(true).open(&jsonl_path)?);

        log::info!(
            "Opened rotation bucket {} ({}, {})",
            bucket.index(),
            csv_path.display(),
            jsonl_path.display()
        );

        Ok(Self {
            bucket,
            csv_path,
            jsonl_path,
            csv,
            jsonl,
        })
    }

    fn append(&mut self, sample: &TelemetrySample) -> Result<(), PersistError> {
        writeln!(self.csv, "{}", sample.to_csv_row())?;
        self.csv.flush()?;

        serde_json::to_writer(&mut self.jsonl, sample)?;
        self.jsonl.write_all(b"\n")?;
        self.jsonl.flush()?;
        Ok(())
    }

    fn close(mut self) -> Result<(), PersistError> {
        self.csv.flush()?;
        self.jsonl.flush()?;
        log::info!("Closed rotation bucket {}", self.bucket.index());
        Ok(())
    }
}

/// Writes every accepted sample to a csv file and a jsonl file, switching to
/// a fresh pair whenever the sample's 5 minute bucket changes.
pub struct RotatingWriter {
    dir: PathBuf,
    current: Option<OpenPair>,
}

impl RotatingWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, current: None })
    }

    #[cfg(test)]
    pub fn current_bucket(&self) -> Option<RotationBucket> {
        self.current.as_ref().map(|pair| pair.bucket)
    }

    #[cfg(test)]
    pub fn current_paths(&self) -> Option<(&Path, &Path)> {
        self.current
            .as_ref()
            .map(|pair| (pair.csv_path.as_path(), pair.jsonl_path.as_path()))
    }

    pub fn write(&mut self, sample: &TelemetrySample) -> Result<WriteOutcome, PersistError> {
        let bucket = RotationBucket::of(sample.timestamp);
        let pair = self.pair_for(bucket)?;

        if !(0.0..=100.0).contains(&sample.battery) {
            let err = ValidationError::BatteryOutOfRange(sample.battery);
            log::warn!("Skipping sample {}: {}", sample.id, err);
            return Ok(WriteOutcome::Rejected(err));
        }

        pair.append(sample)?;
        Ok(WriteOutcome::Written(bucket))
    }

    /// Flushes and closes the open pair, if any.
    pub fn close(&mut self) -> Result<(), PersistError> {
        match self.current.take() {
            Some(pair) => pair.close(),
            None => Ok(()),
        }
    }

    fn pair_for(&mut self, bucket: RotationBucket) -> Result<&mut OpenPair, PersistError> {
        let pair = match self.current.take() {
            Some(pair) if pair.bucket == bucket => pair,
            stale => {
                if let Some(previous) = stale {
                    previous.close()?;
                }
                OpenPair::open(&self.dir, bucket)?
            }
        };
        Ok(self.current.insert(pair))
    }
}

impl Drop for RotatingWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close telemetry files: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::tempdir;

    fn sample_at(id: u64, timestamp: DateTime<Utc>, battery: f64) -> TelemetrySample {
        TelemetrySample {
            id,
            lat: 37.5665 + id as f64 * 1e-5,
            lon: 126.978 - id as f64 * 1e-5,
            altitude: 80.0 + id as f64 * 0.1,
            speed: 7.5,
            heading: (270 + id) as f64 % 360.0,
            battery,
            fix: true,
            timestamp,
        }
    }

    fn read_rows(path: &Path) -> Vec<TelemetrySample> {
        let content = fs::read_to_string(path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        lines.map(|l| TelemetrySample::from_csv_row(l).unwrap()).collect()
    }

    fn read_jsonl(path: &Path) -> Vec<TelemetrySample> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn accepted_samples_round_trip_through_both_sinks() {
        let dir = tempdir().unwrap();
        let mut writer = RotatingWriter::new(dir.path()).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 1).unwrap();
        let samples: Vec<_> = (0..5)
            .map(|i| sample_at(i, t0 + Duration::milliseconds(200 * i as i64 + 7), 100.0 - i as f64 * 0.03))
            .collect();

        for s in &samples {
            assert!(matches!(writer.write(s).unwrap(), WriteOutcome::Written(_)));
        }
        let (csv, jsonl) = writer.current_paths().map(|(c, j)| (c.to_path_buf(), j.to_path_buf())).unwrap();
        writer.close().unwrap();

        assert_eq!(csv.file_name().unwrap(), "pub_telemetry_20240501_1000.csv");
        assert_eq!(read_rows(&csv), samples);
        assert_eq!(read_jsonl(&jsonl), samples);
    }

    #[test]
    fn bucket_change_rotates_to_new_pair() {
        let dir = tempdir().unwrap();
        let mut writer = RotatingWriter::new(dir.path()).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 4, 58).unwrap();

        let a = sample_at(0, t0, 100.0);
        let b = sample_at(1, t0 + Duration::seconds(1), 99.97);
        let c = sample_at(2, t0 + Duration::seconds(2), 99.94);
        writer.write(&a).unwrap();
        writer.write(&b).unwrap();
        let first_bucket = writer.current_bucket().unwrap();
        writer.write(&c).unwrap();
        assert_ne!(writer.current_bucket().unwrap(), first_bucket);
        writer.close().unwrap();

        let first = dir.path().join("pub_telemetry_20240501_1000.csv");
        let second = dir.path().join("pub_telemetry_20240501_1005.csv");
        assert_eq!(read_rows(&first), vec![a, b]);
        assert_eq!(read_rows(&second), vec![c.clone()]);
        assert_eq!(read_jsonl(&dir.path().join("pub_telemetry_20240501_1005.jsonl")), vec![c]);
    }

    #[test]
    fn out_of_range_battery_is_skipped_and_writing_continues() {
        let dir = tempdir().unwrap();
        let mut writer = RotatingWriter::new(dir.path()).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        let bad = sample_at(0, t0, 150.0);
        let good = sample_at(1, t0 + Duration::seconds(1), 99.0);
        assert_eq!(
            writer.write(&bad).unwrap(),
            WriteOutcome::Rejected(ValidationError::BatteryOutOfRange(150.0))
        );
        assert!(matches!(writer.write(&sample_at(2, t0, -0.5)).unwrap(), WriteOutcome::Rejected(_)));
        assert!(matches!(writer.write(&sample_at(3, t0, f64::NAN)).unwrap(), WriteOutcome::Rejected(_)));
        assert!(matches!(writer.write(&good).unwrap(), WriteOutcome::Written(_)));
        writer.close().unwrap();

        let stem = dir.path().join("pub_telemetry_20240501_1000");
        assert_eq!(read_rows(&stem.with_extension("csv")), vec![good.clone()]);
        assert_eq!(read_jsonl(&stem.with_extension("jsonl")), vec![good]);
    }

    #[test]
    fn boundary_values_are_accepted() {
        let dir = tempdir().unwrap();
        let mut writer = RotatingWriter::new(dir.path()).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert!(matches!(writer.write(&sample_at(0, t0, 0.0)).unwrap(), WriteOutcome::Written(_)));
        assert!(matches!(writer.write(&sample_at(1, t0, 100.0)).unwrap(), WriteOutcome::Written(_)));
    }

    #[test]
    fn reopening_a_bucket_appends_without_second_header() {
        let dir = tempdir().unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let a = sample_at(0, t0, 100.0);
        let b = sample_at(1, t0 + Duration::seconds(3), 99.97);

        let mut writer = RotatingWriter::new(dir.path()).unwrap();
        writer.write(&a).unwrap();
        drop(writer);

        let mut writer = RotatingWriter::new(dir.path()).unwrap();
        writer.write(&b).unwrap();
        writer.close().unwrap();

        let csv = dir.path().join("pub_telemetry_20240501_1000.csv");
        assert_eq!(read_rows(&csv), vec![a, b]);
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut writer = RotatingWriter::new(dir.path()).unwrap();
        writer.close().unwrap();
        writer.write(&sample_at(0, Utc::now(), 50.0)).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.current_bucket().is_none());
    }

    #[test]
    fn open_failure_propagates() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        assert!(RotatingWriter::new(&blocker).is_err());
    }
}
