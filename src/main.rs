use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cutboard::config::BoardConfig;
use cutboard::scheduler::DeviceKind;
use cutboard::server::Server;
use cutboard::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "cutboard")]
#[command(version)]
#[command(about = "Production-phase tracking and kanban board for the cutting room")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the board server
    Server(ServerArgs),

    /// Validate a config file and print the device layout
    CheckConfig {
        /// Path to the JSON config file
        path: PathBuf,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Path to a JSON config file (defaults are used when omitted)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the config file
    #[arg(long)]
    port: Option<u16>,

    /// Seconds between day-rollover checks, overriding the config file
    #[arg(long)]
    maintenance_interval: Option<u64>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct DeviceOutput {
    id: String,
    kind: DeviceKind,
}

#[derive(Serialize)]
struct ConfigSummaryOutput {
    listen_addr: String,
    shifts: Vec<String>,
    default_shift: String,
    devices: Vec<DeviceOutput>,
}

// =============================================================================
// Server Implementation
// =============================================================================

fn load_config(path: Option<&PathBuf>) -> Result<BoardConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(BoardConfig::from_file(path)?),
        None => Ok(BoardConfig::default()),
    }
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = load_config(args.config.as_ref())?;
    if let Some(port) = args.port {
        config.listen_addr = SocketAddr::new(config.listen_addr.ip(), port);
    }
    if let Some(secs) = args.maintenance_interval {
        config = config.with_maintenance_interval(secs);
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        devices = config.devices.len(),
        shifts = ?config.shifts,
        maintenance_interval_secs = ?config.maintenance_interval_secs,
        "Starting cutboard server"
    );

    let server = Server::new(config)?;
    let shutdown = install_shutdown_handler();
    server.run(shutdown).await?;

    Ok(())
}

fn handle_check_config(path: PathBuf, output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let config = BoardConfig::from_file(&path)?;

    match output {
        OutputFormat::Json => {
            let summary = ConfigSummaryOutput {
                listen_addr: config.listen_addr.to_string(),
                shifts: config.shifts.clone(),
                default_shift: config.default_shift.clone(),
                devices: config
                    .devices
                    .iter()
                    .map(|d| DeviceOutput {
                        id: d.id.clone(),
                        kind: d.kind,
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Table => {
            println!("Config OK: {}", path.display());
            println!("Listen address: {}", config.listen_addr);
            println!(
                "Shifts: {} (default {})",
                config.shifts.join(", "),
                config.default_shift
            );
            println!();
            println!("{:<12} {:<20}", "DEVICE", "KIND");
            println!("{}", "-".repeat(32));
            for device in &config.devices {
                println!("{:<12} {:<20}", device.id, format!("{:?}", device.kind));
            }
        }
    }

    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::CheckConfig { path, output } => {
            handle_check_config(path, &output)?;
        }
    }

    Ok(())
}
