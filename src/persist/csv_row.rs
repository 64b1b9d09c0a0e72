use std::str::FromStr;

use crate::telemetry::{epoch_seconds, TelemetrySample};

pub const CSV_HEADER: &str = "id,lat,lon,alt,spd,hdg,bat,fix,ts";

impl TelemetrySample {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{:.6}",
            self.id,
            self.lat,
            self.lon,
            self.altitude,
            self.speed,
            self.heading,
            self.battery,
            self.fix,
            epoch_seconds::to_secs(&self.timestamp),
        )
    }

    pub fn from_csv_row(row: &str) -> Result<Self, String> {
        let cols: Vec<&str> = row.trim_end_matches(['\r', '\n']).split(',').collect();
        if cols.len() != TelemetrySample::FIELDS.len() {
            return Err(format!(
                "expected {} columns, found {}",
                TelemetrySample::FIELDS.len(),
                cols.len()
            ));
        }

        let ts: f64 = column(&cols, 8)?;
        Ok(TelemetrySample {
            id: column(&cols, 0)?,
            lat: column(&cols, 1)?,
            lon: column(&cols, 2)?,
            altitude: column(&cols, 3)?,
            speed: column(&cols, 4)?,
            heading: column(&cols, 5)?,
            battery: column(&cols, 6)?,
            fix: parse_bool(cols[7])?,
            timestamp: epoch_seconds::from_secs(ts).ok_or_else(|| format!("bad ts: {}", ts))?,
        })
    }
}

fn column<T: FromStr>(cols: &[&str], index: usize) -> Result<T, String> {
    cols[index].trim().parse().map_err(|_| {
        format!(
            "bad {}: {:?}",
            TelemetrySample::FIELDS[index],
            cols[index]
        )
    })
}

// Older captures were written with capitalised booleans.
fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(format!("bad fix: {:?}", other)),
    }
}
