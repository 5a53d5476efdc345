mod client;
mod collectors;
mod config;
mod health;
mod stream;
mod transport;

use clap::{Parser, Subcommand};
use client::{AdminClient, HealthInfoError};
use config::{Config, ConfigError};
use health::{HealthDataType, HealthInfo};
use serde_json::value::RawValue;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use transport::{ReqwestTransport, Transport, TransportError};

#[derive(Parser, Debug)]
#[command(name = "healthdiag")]
#[command(version, about = "Cluster health diagnostics")]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: PathBuf,
    #[arg(long)]
    print_default_config: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect system information of this node.
    Snapshot {
        /// Address reported for this node; defaults to the host name.
        #[arg(long)]
        addr: Option<String>,
        #[arg(long)]
        pretty: bool,
    },
    /// Request the cluster health report.
    Report {
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<HealthDataType>,
        #[arg(long, conflicts_with = "types")]
        all: bool,
        /// Collection deadline, e.g. `10m` or `1h 30m`.
        #[arg(long)]
        deadline: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    HealthInfo(#[from] HealthInfoError),
    #[error("health info request did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("server closed the health info response without a report")]
    NoReport,
    #[error("unable to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unable to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("snapshot task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let result = match cli.command {
        Some(Command::Snapshot { addr, pretty }) => run_snapshot(addr, pretty).await,
        Some(Command::Report {
            types,
            all,
            deadline,
            output,
        }) => run_report(&cli.config, types, all, deadline, output).await,
        None => {
            error!("no command given, see --help");
            std::process::exit(2);
        }
    };

    if let Err(err) = result {
        error!(error = %err, "healthdiag failed");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_snapshot(addr: Option<String>, pretty: bool) -> Result<(), AppError> {
    let sys = tokio::task::spawn_blocking(move || {
        let addr = addr.unwrap_or_else(collectors::local_addr);
        info!(addr = %addr, "collecting local system information");
        collectors::collect_sys_info(&addr)
    })
    .await?;

    let json = if pretty {
        serde_json::to_string_pretty(&sys)?
    } else {
        serde_json::to_string(&sys)?
    };
    println!("{json}");
    Ok(())
}

async fn run_report(
    config_path: &Path,
    types: Vec<HealthDataType>,
    all: bool,
    deadline: Option<String>,
    output: Option<PathBuf>,
) -> Result<(), AppError> {
    let cfg = Config::load_from_file(config_path)?;
    let deadline = match deadline {
        Some(text) => config::parse_deadline(&text)?,
        None => cfg.deadline()?,
    };
    let types = select_types(types, all, &cfg);

    info!(
        endpoint = %cfg.endpoint,
        types = types.len(),
        deadline = %humantime::format_duration(deadline),
        "requesting cluster health report"
    );

    let client = AdminClient::new(ReqwestTransport::from_config(&cfg)?);
    let budget = cfg.request_budget(deadline);
    let report = tokio::time::timeout(budget, fetch_report(&client, &types, deadline))
        .await
        .map_err(|_| AppError::TimedOut(budget))??;

    write_report(&report, output.as_deref())
}

fn select_types(types: Vec<HealthDataType>, all: bool, cfg: &Config) -> Vec<HealthDataType> {
    if all {
        HealthDataType::ALL.to_vec()
    } else if types.is_empty() {
        cfg.types.clone()
    } else {
        types
    }
}

/// Returns the final snapshot exactly as the server sent it.
async fn fetch_report<T: Transport>(
    client: &AdminClient<T>,
    types: &[HealthDataType],
    deadline: Duration,
) -> Result<Box<RawValue>, AppError> {
    let stream = client.server_health_info(types, deadline).await?;
    info!(version = %stream.version(), "health info version negotiated");

    let report = stream.latest_raw().await?.ok_or(AppError::NoReport)?;
    // The typed view only feeds the log; the report is written verbatim.
    let summary = match serde_json::from_str::<Option<HealthInfo>>(report.get()) {
        Ok(summary) => summary.unwrap_or_default(),
        Err(err) => {
            debug!(error = %err, "health report does not match the typed model");
            return Ok(report);
        }
    };
    info!(
        cpus = summary.sys.cpus.len(),
        partitions = summary.sys.partitions.len(),
        drives = summary.perf.drives.len(),
        peers = summary.perf.net.len(),
        "health report received"
    );
    if let Some(err) = summary.error.as_deref().filter(|e| !e.is_empty()) {
        warn!(error = %err, "health report is incomplete");
    }
    Ok(report)
}

fn write_report(report: &RawValue, output: Option<&Path>) -> Result<(), AppError> {
    let json = report.get();
    match output {
        Some(path) => {
            std::fs::write(path, format!("{json}\n")).map_err(|source| AppError::Write {
                path: path.display().to_string(),
                source,
            })?;
            info!(path = %path.display(), "health report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}
