//! ferry-ftpd - Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use ferry_ftpd::{LogSink, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "ferry-ftpd", version, about = "A small FTP server")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the control port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the served root directory
    #[arg(short, long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            writeln!(buf, "[{}] [{}] {}", timestamp, record.level(), record.args())
        })
        .init();

    let mut config = ServerConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load configuration file: {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;
    if let Some(port) = cli.port {
        config.control_port = port;
    }
    if let Some(root) = cli.root {
        config.server_root = root;
    }
    config.validate().context("Invalid configuration")?;

    info!("Launching FTP server...");
    let server = ferry_ftpd::start(config, Arc::new(LogSink))
        .await
        .context("Server startup failed")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    server.stop().await;

    Ok(())
}
