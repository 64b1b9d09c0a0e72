mod config;
mod persist;
mod reliability;
mod session;
mod telemetry;
mod transport;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use crate::config::{parse_duration, Config};
use crate::persist::BatteryAnalysis;
use crate::session::{install_signal_handlers, stop_channel, Session, SessionMode};
use crate::transport::{DeliveryLevel, LoopbackBroker, MqttTransport, TransportKind};

#[derive(Parser)]
#[command(name = "drone-telemetry")]
#[command(about = "Simulated drone telemetry publisher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a telemetry session
    Run(RunArgs),
    /// Summarise battery levels in previously written csv files
    Analyze {
        #[arg(long, env = "DATA_DIR", default_value = "data")]
        data_dir: PathBuf,
        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// YAML file with broker, drone, publish and session sections
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, env = "MQTT_HOST")]
    host: Option<String>,
    #[arg(long, env = "MQTT_PORT")]
    port: Option<u16>,
    #[arg(long, env = "MQTT_TLS", value_parser = clap::builder::BoolishValueParser::new())]
    tls: Option<bool>,
    #[arg(long, env = "MQTT_TRANSPORT", value_enum)]
    transport: Option<TransportKind>,
    #[arg(long, env = "DRONE_FLEET")]
    fleet: Option<String>,
    #[arg(long = "drone-id", env = "DRONE_ID")]
    drone_id: Option<String>,
    /// Samples per second
    #[arg(long, env = "PUB_RATE_HZ")]
    rate: Option<f64>,
    /// Delivery level, 0 or 1
    #[arg(long, env = "PUB_QOS", value_parser = parse_level)]
    qos: Option<DeliveryLevel>,
    #[arg(long, env = "RETAIN_BATTERY", value_parser = clap::builder::BoolishValueParser::new())]
    retain_battery: Option<bool>,
    /// e.g. "600s" or "10m"
    #[arg(long, env = "SESSION_DURATION", value_parser = parse_duration)]
    duration: Option<Duration>,
    #[arg(long, env = "SESSION_MODE", value_enum)]
    mode: Option<SessionMode>,
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,
    /// Use an in-process broker instead of connecting to MQTT
    #[arg(long)]
    offline: bool,
    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn into_config(self) -> Result<Config, config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(host) = self.host {
            config.broker.host = host;
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(tls) = self.tls {
            config.broker.tls = tls;
        }
        if let Some(transport) = self.transport {
            config.broker.transport = transport;
        }
        if let Some(fleet) = self.fleet {
            config.drone.fleet = fleet;
        }
        if let Some(id) = self.drone_id {
            config.drone.id = id;
        }
        if let Some(rate) = self.rate {
            config.publish.rate_hz = rate;
        }
        if let Some(qos) = self.qos {
            config.publish.qos = qos;
        }
        if let Some(retain) = self.retain_battery {
            config.publish.retain_battery = retain;
        }
        if let Some(duration) = self.duration {
            config.session.duration = duration;
        }
        if let Some(mode) = self.mode {
            config.session.mode = mode;
        }
        if let Some(dir) = self.data_dir {
            config.session.data_dir = dir;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_level(s: &str) -> Result<DeliveryLevel, String> {
    let level: u8 = s.trim().parse().map_err(|e| format!("{}", e))?;
    DeliveryLevel::try_from(level)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Analyze { data_dir, json } => analyze(&data_dir, json),
    }
}

async fn run(args: RunArgs) -> ExitCode {
    let offline = args.offline;
    let json = args.json;
    let config = match args.into_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    log::info!(
        "Drone {}/{} at {} Hz for {}, mode {}",
        config.drone.fleet,
        config.drone.id,
        config.publish.rate_hz,
        humantime::format_duration(config.session.duration),
        config.session.mode
    );

    let (handle, stop) = stop_channel();
    install_signal_handlers(handle);

    let result = if offline {
        let broker = LoopbackBroker::new();
        let mut session = Session::new(config, broker.transport(), broker.transport(), stop);
        session.run().await
    } else {
        let mut session = Session::new(config, MqttTransport::new(), MqttTransport::new(), stop);
        session.run().await
    };

    match result {
        Ok(report) => {
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(s) => println!("{}", s),
                    Err(e) => {
                        eprintln!("Failed to encode report: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                report.print();
            }
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("Session failed to start: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn analyze(data_dir: &std::path::Path, json: bool) -> ExitCode {
    let analysis = match BatteryAnalysis::from_dir(data_dir) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Analysis failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if json {
        match serde_json::to_string_pretty(&analysis) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("Failed to encode analysis: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        analysis.print_summary();
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RunArgs {
        let mut argv = vec!["drone-telemetry", "run"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
            Commands::Analyze { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drone.yaml");
        std::fs::write(
            &path,
            "drone:\n  fleet: north\n  id: d7\npublish:\n  rate_hz: 2\n",
        )
        .unwrap();

        let config = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--drone-id",
            "d9",
            "--qos",
            "1",
            "--tls",
            "yes",
            "--duration",
            "90s",
            "--mode",
            "reliability",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.drone.fleet, "north");
        assert_eq!(config.drone.id, "d9");
        assert_eq!(config.publish.rate_hz, 2.0);
        assert_eq!(config.publish.qos, DeliveryLevel::AtLeastOnce);
        assert!(config.broker.tls);
        assert_eq!(config.session.duration, Duration::from_secs(90));
        assert_eq!(config.session.mode, SessionMode::Reliability);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Cli::try_parse_from(["drone-telemetry", "run", "--qos", "2"]).is_err());
        assert!(parse(&["--fleet", "a+b"]).into_config().is_err());
        assert!(parse(&["--port", "0"]).into_config().is_err());
    }
}
