mod payload;
mod sample;
mod simulator;
mod topics;

pub use payload::{AltitudePayload, BatteryPayload, InboundId, ModeAnnouncement, PresenceAnnouncement};
pub use sample::{epoch_seconds, TelemetrySample};
pub use simulator::{GeoPoint, Simulator};
pub use topics::Topics;
