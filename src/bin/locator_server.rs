use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use acoustic_locator::config::AppConfig;
use acoustic_locator::http::{run_http_server, AppState};
use acoustic_locator::store::Store;
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "locator_server",
    about = "Three-listener acoustic event localizer HTTP/WebSocket server"
)]
struct Cli {
    /// Listen address, e.g. 127.0.0.1:8080. Falls back to LOCATOR_ADDR, then 127.0.0.1:8080.
    #[arg(long)]
    addr: Option<SocketAddr>,
    /// Path to a JSON configuration file. Falls back to LOCATOR_CONFIG.
    /// Missing or malformed files fall back to built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "server exited with an error");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let addr = resolve_addr(cli.addr)?;
    let config = match cli.config.or_else(|| std::env::var("LOCATOR_CONFIG").ok().map(PathBuf::from)) {
        Some(path) => AppConfig::load_from_file(path),
        None => {
            tracing::info!("no --config/LOCATOR_CONFIG given, using built-in defaults");
            AppConfig::default()
        }
    };

    let state = AppState::new(Store::new(config));

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime.block_on(run_http_server(state, addr))
}

fn resolve_addr(flag: Option<SocketAddr>) -> Result<SocketAddr> {
    if let Some(addr) = flag {
        return Ok(addr);
    }
    if let Ok(raw) = std::env::var("LOCATOR_ADDR") {
        return raw
            .parse()
            .with_context(|| format!("parsing LOCATOR_ADDR {raw:?}"));
    }
    Ok(SocketAddr::from(([127, 0, 0, 1], 8080)))
}
