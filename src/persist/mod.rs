mod analysis;
mod csv_row;
mod error;
mod rotation;
mod writer;

pub use analysis::BatteryAnalysis;
pub use csv_row::CSV_HEADER;
pub use error::PersistError;
pub use rotation::RotationBucket;
pub use writer::{RotatingWriter, WriteOutcome};
