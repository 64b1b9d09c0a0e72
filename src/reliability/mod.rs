mod accountant;
mod stats;

pub use accountant::Accountant;
pub use stats::SessionStatistics;
