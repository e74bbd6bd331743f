//! Process entry point for the bridge daemon.

use clap::Parser;
use rfidbridge_core::Config;
use rfidbridge_server::App;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rfidbridge", version, about = "RFID staff-workstation bridge")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Log filter, e.g. "info" or "rfidbridge_server=debug".
    /// Overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        match Config::from_file(&cli.config) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("cannot load {}: {e}", cli.config.display());
                return ExitCode::FAILURE;
            }
        }
    } else {
        Config::default()
    };
    if let Err(e) = cfg.apply_env_overrides() {
        eprintln!("invalid environment override: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = init_logging(&cli, &cfg) {
        eprintln!("cannot initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    if !cli.config.exists() {
        warn!(config = %cli.config.display(), "configuration file not found, using defaults");
    }

    let app = match App::start(cfg).await {
        Ok(app) => app,
        Err(e) => {
            // Without backend sessions the bridge is useless; exit so
            // the supervisor notices.
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };
    info!(addr = %app.http_addr(), "rfidbridge running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for shutdown signal");
    }
    info!("shutting down");
    app.shutdown().await;
    ExitCode::SUCCESS
}

fn init_logging(cli: &Cli, cfg: &Config) -> std::io::Result<()> {
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    if cfg.error_log_file.is_empty() {
        tracing_subscriber::registry().with(stderr_layer).init();
    } else {
        // Warnings and errors are additionally kept in a file that
        // survives terminal scrollback.
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.error_log_file)?;
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(Arc::new(file))
            .with_filter(LevelFilter::WARN);
        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .init();
    }
    Ok(())
}
