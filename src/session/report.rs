use serde::Serialize;

use crate::persist::BatteryAnalysis;
use crate::reliability::SessionStatistics;
use crate::session::SessionMode;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Termination {
    Elapsed,
    Stopped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSummary {
    Reliability(SessionStatistics),
    Persistence(BatteryAnalysis),
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub mode: SessionMode,
    pub termination: Termination,
    pub samples_emitted: u64,
    /// Samples the writer refused (battery out of range).
    pub samples_rejected: u64,
    pub publish_failures: u64,
    pub malformed_inbound: usize,
    pub summary: ReportSummary,
}

impl SessionReport {
    pub fn is_success(&self) -> bool {
        !matches!(self.termination, Termination::Failed(_))
    }

    pub fn print(&self) {
        println!("\n=== Session ({}) ===", self.mode);
        match &self.termination {
            Termination::Elapsed => println!("Ended: duration elapsed"),
            Termination::Stopped => println!("Ended: stop requested"),
            Termination::Failed(reason) => println!("Ended: failed ({})", reason),
        }
        println!("Samples emitted: {}", self.samples_emitted);
        if self.samples_rejected > 0 {
            println!("Samples not persisted: {}", self.samples_rejected);
        }
        println!("Publish failures: {}", self.publish_failures);
        if self.malformed_inbound > 0 {
            println!("Malformed inbound messages: {}", self.malformed_inbound);
        }

        match &self.summary {
            ReportSummary::Reliability(stats) => stats.print_summary(),
            ReportSummary::Persistence(analysis) => analysis.print_summary(),
            ReportSummary::Unavailable(reason) => println!("No summary: {}\n", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_termination_is_not_success() {
        let mut report = SessionReport {
            mode: SessionMode::Persistence,
            termination: Termination::Elapsed,
            samples_emitted: 3,
            samples_rejected: 0,
            publish_failures: 0,
            malformed_inbound: 0,
            summary: ReportSummary::Persistence(BatteryAnalysis::default()),
        };
        assert!(report.is_success());
        report.termination = Termination::Stopped;
        assert!(report.is_success());
        report.termination = Termination::Failed("disk full".into());
        assert!(!report.is_success());
    }

    #[test]
    fn serializes_termination_with_reason() {
        let json = serde_json::to_value(Termination::Failed("disk full".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "failed", "reason": "disk full"}));
        let json = serde_json::to_value(Termination::Elapsed).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "elapsed"}));
    }
}
