/// MQTT topic layout for one drone. The strings are an interop contract with
/// existing dashboards and must not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub base: String,
    pub gps: String,
    pub alt: String,
    pub battery: String,
    pub online: String,
    pub mode: String,
}

impl Topics {
    pub fn new(fleet: &str, drone_id: &str) -> Self {
        let base = format!("drone/{}/{}", fleet, drone_id);
        Self {
            gps: format!("{}/telemetry/gps", base),
            alt: format!("{}/telemetry/alt", base),
            battery: format!("{}/status/battery", base),
            online: format!("{}/status/online", base),
            mode: format!("{}/status/mode", base),
            base,
        }
    }
}
