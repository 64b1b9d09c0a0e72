use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed row in {}:{line}: {message}", .path.display())]
    MalformedRow {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// A sample that was refused by the writer. Never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("battery {0} outside [0, 100]")]
    BatteryOutOfRange(f64),
}
