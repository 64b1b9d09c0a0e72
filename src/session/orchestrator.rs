use std::time::Duration;

use chrono::Utc;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};

use crate::config::Config;
use crate::persist::{BatteryAnalysis, RotatingWriter, WriteOutcome};
use crate::reliability::Accountant;
use crate::session::{
    error::SessionError,
    report::{ReportSummary, SessionReport, Termination},
    stop::StopSignal,
};
use crate::telemetry::{
    AltitudePayload, BatteryPayload, InboundId, ModeAnnouncement, PresenceAnnouncement, Simulator,
    TelemetrySample, Topics,
};
use crate::transport::{Announcement, ConnectOptions, DeliveryLevel, InboundMessage, Transport};

const COLLECTOR_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_DELIVERY_GRACE: Duration = Duration::from_secs(1);
const WILL_PAYLOAD: &[u8] = b"offline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionMode {
    /// Subscribe to our own gps stream and account for every delivery.
    Reliability,
    /// Write every sample to rotated csv/jsonl files.
    #[default]
    Persistence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Init,
    Running,
    Draining,
    Reported,
}

#[derive(Debug, Default)]
struct Progress {
    next_id: u64,
    rejected: u64,
    publish_failures: u64,
}

/// Drives one simulated flight: connects, emits at a fixed rate until the
/// duration elapses or a stop is requested, then drains and reports.
pub struct Session<T: Transport> {
    config: Config,
    topics: Topics,
    publisher: T,
    subscriber: T,
    stop: StopSignal,
    simulator: Simulator,
    accountant: Accountant,
    state: SessionState,
}

impl<T: Transport> Session<T> {
    pub fn new(config: Config, publisher: T, subscriber: T, stop: StopSignal) -> Self {
        let simulator = Simulator::new(config.drone.origin);
        Self::with_simulator(config, publisher, subscriber, stop, simulator)
    }

    pub fn with_simulator(
        config: Config,
        publisher: T,
        subscriber: T,
        stop: StopSignal,
        simulator: Simulator,
    ) -> Self {
        Self {
            topics: Topics::new(&config.drone.fleet, &config.drone.id),
            config,
            publisher,
            subscriber,
            stop,
            simulator,
            accountant: Accountant::new(),
            state: SessionState::Init,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Only an INIT failure is returned as `Err`. Anything that goes wrong
    /// while running ends up in the report's termination.
    pub async fn run(&mut self) -> Result<SessionReport, SessionError> {
        self.transition(SessionState::Init);
        let (mut writer, collector) = match self.init().await {
            Ok(parts) => parts,
            Err(e) => {
                log::error!("Session init failed: {}", e);
                self.release_transports().await;
                return Err(e);
            }
        };

        self.transition(SessionState::Running);
        let mut progress = Progress::default();
        let mut termination = match self.emit(&mut writer, &mut progress).await {
            Ok(termination) => termination,
            Err(e) => {
                log::error!("Session aborted: {}", e);
                Termination::Failed(e.to_string())
            }
        };

        self.transition(SessionState::Draining);
        if self.config.session.mode == SessionMode::Reliability {
            // Messages published just before the stop are still in flight.
            tokio::time::sleep(delivery_grace(self.config.period())).await;
        }
        self.release_transports().await;
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close() {
                log::error!("Failed to close telemetry files: {}", e);
                if !matches!(termination, Termination::Failed(_)) {
                    termination = Termination::Failed(e.to_string());
                }
            }
        }
        let malformed_inbound = match collector {
            Some(handle) => drain_collector(handle).await,
            None => 0,
        };

        if self.config.session.mode == SessionMode::Reliability {
            log::info!(
                "Accounted {} sent and {} received messages",
                self.accountant.sent_count(),
                self.accountant.received_count()
            );
        }
        let summary = self.summarize(progress.next_id);
        self.transition(SessionState::Reported);

        Ok(SessionReport {
            mode: self.config.session.mode,
            termination,
            samples_emitted: progress.next_id,
            samples_rejected: progress.rejected,
            publish_failures: progress.publish_failures,
            malformed_inbound,
            summary,
        })
    }

    async fn init(
        &mut self,
    ) -> Result<(Option<RotatingWriter>, Option<JoinHandle<usize>>), SessionError> {
        log::info!("Publishing under {}", self.topics.base);
        let will = Announcement {
            topic: self.topics.online.clone(),
            payload: WILL_PAYLOAD.to_vec(),
            level: DeliveryLevel::AtLeastOnce,
            retain: true,
        };
        let options = self.connect_options("pub", Some(will));
        self.publisher.connect(&options).await?;

        let (writer, collector) = match self.config.session.mode {
            SessionMode::Persistence => {
                (Some(RotatingWriter::new(&self.config.session.data_dir)?), None)
            }
            SessionMode::Reliability => {
                let options = self.connect_options("sub", None);
                self.subscriber.connect(&options).await?;
                let inbound = self
                    .subscriber
                    .subscribe(&self.topics.gps, self.config.publish.qos)
                    .await?;
                let collector = tokio::spawn(collect_inbound(inbound, self.accountant.clone()));
                (None, Some(collector))
            }
        };

        let online = serde_json::to_vec(&PresenceAnnouncement::online())?;
        let mode = serde_json::to_vec(&ModeAnnouncement::cruise())?;
        let online_topic = self.topics.online.clone();
        let mode_topic = self.topics.mode.clone();
        self.announce(&online_topic, online).await;
        self.announce(&mode_topic, mode).await;

        Ok((writer, collector))
    }

    async fn emit(
        &mut self,
        writer: &mut Option<RotatingWriter>,
        progress: &mut Progress,
    ) -> Result<Termination, SessionError> {
        let started = Instant::now();
        let mut ticker = interval(self.config.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous = self.simulator.init();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop.requested() => {}
            }
            if let Some(reason) = termination_reason(
                self.stop.is_requested(),
                started.elapsed(),
                self.config.session.duration,
            ) {
                log::info!("Emission loop finished after {} samples", progress.next_id);
                return Ok(reason);
            }

            let sample = self.simulator.step(&previous).with_id(progress.next_id);
            progress.next_id += 1;

            if self.config.session.mode == SessionMode::Reliability {
                self.accountant.record_sent(sample.id, Utc::now());
            }
            self.dispatch(&sample, progress).await?;
            if let Some(writer) = writer.as_mut() {
                if let WriteOutcome::Rejected(_) = writer.write(&sample)? {
                    progress.rejected += 1;
                }
            }

            previous = sample;
        }
    }

    async fn dispatch(
        &mut self,
        sample: &TelemetrySample,
        progress: &mut Progress,
    ) -> Result<(), SessionError> {
        let level = self.config.publish.qos;
        let messages = [
            (self.topics.gps.clone(), serde_json::to_vec(sample)?, false),
            (
                self.topics.alt.clone(),
                serde_json::to_vec(&AltitudePayload::from(sample))?,
                false,
            ),
            (
                self.topics.battery.clone(),
                serde_json::to_vec(&BatteryPayload::from(sample))?,
                self.config.publish.retain_battery,
            ),
        ];

        for (topic, payload, retain) in messages {
            if let Err(e) = self.publisher.publish(&topic, payload, level, retain).await {
                progress.publish_failures += 1;
                log::warn!("Publish of sample {} to {} failed: {}", sample.id, topic, e);
            }
        }
        Ok(())
    }

    async fn announce(&mut self, topic: &str, payload: Vec<u8>) {
        if let Err(e) = self
            .publisher
            .publish(topic, payload, DeliveryLevel::AtLeastOnce, true)
            .await
        {
            log::warn!("Announcement on {} failed: {}", topic, e);
        }
    }

    fn summarize(&self, total_sent: u64) -> ReportSummary {
        match self.config.session.mode {
            SessionMode::Reliability => {
                ReportSummary::Reliability(self.accountant.compute_statistics(total_sent))
            }
            SessionMode::Persistence => {
                match BatteryAnalysis::from_dir(&self.config.session.data_dir) {
                    Ok(analysis) => ReportSummary::Persistence(analysis),
                    Err(e) => {
                        log::error!("Battery analysis failed: {}", e);
                        ReportSummary::Unavailable(e.to_string())
                    }
                }
            }
        }
    }

    async fn release_transports(&mut self) {
        if let Err(e) = self.publisher.disconnect().await {
            log::warn!("Publisher disconnect failed: {}", e);
        }
        if let Err(e) = self.subscriber.disconnect().await {
            log::warn!("Subscriber disconnect failed: {}", e);
        }
    }

    fn connect_options(&self, role: &str, will: Option<Announcement>) -> ConnectOptions {
        let broker = &self.config.broker;
        ConnectOptions {
            host: broker.host.clone(),
            port: broker.port,
            tls: broker.tls,
            kind: broker.transport,
            client_id: ConnectOptions::client_id(&self.config.drone.id, role),
            will,
        }
    }

    fn transition(&mut self, next: SessionState) {
        log::info!("Session {} -> {}", self.state, next);
        self.state = next;
    }
}

/// A stop request wins over an elapsed duration when both hold.
fn termination_reason(stop_requested: bool, elapsed: Duration, limit: Duration) -> Option<Termination> {
    if stop_requested {
        Some(Termination::Stopped)
    } else if elapsed >= limit {
        Some(Termination::Elapsed)
    } else {
        None
    }
}

fn delivery_grace(period: Duration) -> Duration {
    period.min(MAX_DELIVERY_GRACE)
}

/// Feeds the received table; returns how many messages were dropped as
/// malformed.
async fn collect_inbound(mut inbound: mpsc::Receiver<InboundMessage>, accountant: Accountant) -> usize {
    let mut malformed = 0;
    while let Some(message) = inbound.recv().await {
        match serde_json::from_slice::<InboundId>(&message.payload) {
            Ok(InboundId { id }) => accountant.record_received(id, message.received_at),
            Err(e) => {
                malformed += 1;
                log::warn!("Dropping malformed message on {}: {}", message.topic, e);
            }
        }
    }
    malformed
}

async fn drain_collector(mut handle: JoinHandle<usize>) -> usize {
    match timeout(COLLECTOR_DRAIN_TIMEOUT, &mut handle).await {
        Ok(Ok(malformed)) => malformed,
        Ok(Err(e)) => {
            log::error!("Inbound collector failed: {}", e);
            0
        }
        Err(_) => {
            log::warn!("Inbound collector still running after disconnect, aborting it");
            handle.abort();
            0
        }
    }
}
