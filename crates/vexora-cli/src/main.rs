//! Command-line interface for the Vexora device backend.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use vexora_api::ServerState;
use vexora_devices::{CommandError, DeviceBackend, Params, VexoraConfig};

/// Vexora device backend - MQTT telemetry ingestion and device commands.
#[derive(Parser, Debug)]
#[command(name = "vexora")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML). Environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the backend: broker connection, ingestion and HTTP API.
    Serve {
        /// Address for the HTTP API (overrides HTTP_ADDR).
        #[arg(long)]
        http_addr: Option<String>,
    },
    /// Send one command to a device and print the acknowledgement.
    Send {
        /// Target device id.
        device_id: String,
        /// Command type, e.g. `ping`.
        command_type: String,
        /// Command parameters as a JSON object.
        #[arg(short, long)]
        params: Option<String>,
        /// Acknowledgement timeout in milliseconds.
        #[arg(short, long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
    /// Print the effective configuration with secrets masked.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Serve { http_addr } => run_server(args.config, http_addr).await,
        Command::Send {
            device_id,
            command_type,
            params,
            timeout_ms,
        } => send_command(args.config, device_id, command_type, params, timeout_ms).await,
        Command::Config => print_config(args.config),
    }
}

fn init_logging(verbose: bool) {
    // JSON format for production/container environments
    let json_logging = std::env::var("VEXORA_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if verbose { "vexora=debug" } else { "vexora=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<PathBuf>) -> Result<VexoraConfig> {
    VexoraConfig::load(path.as_deref()).context("failed to load configuration")
}

async fn run_server(config_path: Option<PathBuf>, http_addr: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(addr) = http_addr {
        config.http.addr = addr;
    }
    let bind = config.http_addr()?;

    let backend = DeviceBackend::from_config(&config)?;
    backend
        .start()
        .await
        .context("initial broker connection failed")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        signal.cancel();
    });

    let result = vexora_api::run(ServerState::from_backend(&backend), bind, shutdown).await;
    backend.shutdown().await;
    result
}

async fn send_command(
    config_path: Option<PathBuf>,
    device_id: String,
    command_type: String,
    params: Option<String>,
    timeout_ms: u64,
) -> Result<()> {
    let params: Params = match params {
        Some(raw) => serde_json::from_str(&raw).context("--params must be a JSON object")?,
        None => Params::new(),
    };

    let mut config = load_config(config_path)?;
    config.mqtt.client_id = format!("{}-cli-{}", config.mqtt.client_id, std::process::id());

    let backend = DeviceBackend::from_config(&config)?;
    backend
        .start()
        .await
        .context("failed to connect to broker")?;

    let result = backend
        .commands
        .send(
            &device_id,
            &command_type,
            params,
            Duration::from_millis(timeout_ms),
        )
        .await;
    backend.shutdown().await;

    match result {
        Ok(ack) => {
            println!("{}", serde_json::to_string_pretty(&ack)?);
            Ok(())
        }
        Err(CommandError::Timeout { ack, timeout }) => {
            println!("{}", serde_json::to_string_pretty(&ack)?);
            anyhow::bail!("no acknowledgement within {} ms", timeout.as_millis())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    print!("{}", config.redacted().to_toml_string()?);
    Ok(())
}
