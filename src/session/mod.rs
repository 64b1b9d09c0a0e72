mod error;
mod orchestrator;
mod report;
mod stop;

pub use error::SessionError;
pub use orchestrator::{Session, SessionMode, SessionState};
pub use report::{ReportSummary, SessionReport, Termination};
pub use stop::{install_signal_handlers, stop_channel, StopSignal};
