use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::persist::{csv_row::CSV_HEADER, error::PersistError, rotation::RotationBucket};
use crate::telemetry::TelemetrySample;

pub const LOW_BATTERY_THRESHOLD: f64 = 20.0;

const PREVIEW_ROWS: usize = 5;

/// Aggregate over every rotated csv file in a data directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatteryAnalysis {
    pub files: usize,
    pub rows: usize,
    pub mean_battery: Option<f64>,
    pub low_battery: Vec<TelemetrySample>,
}

impl BatteryAnalysis {
    pub fn from_dir(dir: &Path) -> Result<Self, PersistError> {
        let files = rotated_csv_files(dir)?;
        if files.is_empty() {
            log::warn!("No telemetry csv files in {}", dir.display());
            return Ok(Self::default());
        }

        let mut samples = Vec::new();
        for path in &files {
            samples.extend(read_csv(path)?);
        }
        Ok(Self::from_samples(files.len(), samples))
    }

    pub fn from_samples(files: usize, samples: Vec<TelemetrySample>) -> Self {
        let rows = samples.len();
        let mean_battery = if rows == 0 {
            None
        } else {
            Some(samples.iter().map(|s| s.battery).sum::<f64>() / rows as f64)
        };
        let low_battery = samples
            .into_iter()
            .filter(|s| s.battery < LOW_BATTERY_THRESHOLD)
            .collect();

        Self {
            files,
            rows,
            mean_battery,
            low_battery,
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Battery Analysis ===");
        println!("Files: {}", self.files);
        println!("Rows: {}", self.rows);
        match self.mean_battery {
            Some(mean) => println!("Mean battery: {:.2}%", mean),
            None => println!("Mean battery: n/a"),
        }
        println!(
            "Low battery rows (< {}%): {}",
            LOW_BATTERY_THRESHOLD,
            self.low_battery.len()
        );
        if !self.low_battery.is_empty() {
            println!("{}", CSV_HEADER);
            for sample in self.low_battery.iter().take(PREVIEW_ROWS) {
                println!("{}", sample.to_csv_row());
            }
        }
        println!();
    }
}

fn rotated_csv_files(dir: &Path) -> Result<Vec<PathBuf>, PersistError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in dir.read_dir()? {
        let path = entry?.path();
        let is_rotated = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| RotationBucket::matches_file_name(n, "csv"));
        if path.is_file() && is_rotated {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_csv(path: &Path) -> Result<Vec<TelemetrySample>, PersistError> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty() && line.trim() != CSV_HEADER)
        .map(|(i, line)| {
            TelemetrySample::from_csv_row(line).map_err(|message| PersistError::MalformedRow {
                path: path.to_path_buf(),
                line: i + 1,
                message,
            })
        })
        .collect()
}
