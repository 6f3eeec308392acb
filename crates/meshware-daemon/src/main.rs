//! Meshware Daemon - Main entry point
//!
//! Hosts the distributed hardware framework behind a REST API and an event
//! stream, or acts as a client of a running daemon for `--dump`.

mod api;
mod config;
mod server;
mod state;
mod ws;

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "meshware")]
#[command(about = "Distributed hardware component manager daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "meshware.toml")]
    config: PathBuf,

    /// Bind address for the API server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write a default configuration file and exit
    #[arg(long)]
    init_config: bool,

    /// Print a dump from the running daemon (e.g. --dump -t)
    #[arg(long, num_args = 0.., allow_hyphen_values = true)]
    dump: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if args.init_config {
        if args.config.exists() {
            bail!("{} already exists", args.config.display());
        }
        config::save_default_config(&args.config)?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override bind address if specified
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    if let Some(dump_args) = args.dump {
        let text = request_dump(&config.daemon.bind, dump_args).await?;
        print!("{}", text);
        return Ok(());
    }

    info!("Meshware v{}", env!("CARGO_PKG_VERSION"));
    info!(
        manifest = %config.components.manifest.display(),
        bind = %config.daemon.bind,
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone())?;
    server::run(state, &config.daemon.bind).await?;

    Ok(())
}

/// Ask a running daemon for a dump
async fn request_dump(bind: &str, args: Vec<String>) -> Result<String> {
    let url = format!("http://{}/api/dump", bind);
    let response = reqwest::Client::new()
        .post(&url)
        .json(&serde_json::json!({ "args": args }))
        .send()
        .await?;
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        bail!("{}", text);
    }
    Ok(text)
}
