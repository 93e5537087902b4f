//! Tunecast Server - standalone DAAP share.
//!
//! Shares a music directory with DAAP clients on the local network:
//! scans the tree, serves browsing and streaming over the DAAP HTTP
//! subset, and advertises the share via mDNS.

mod config;
mod fs_library;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tunecast_core::{DaapServer, LoggingEvents, MediaLibrary};

use crate::config::AppConfig;
use crate::fs_library::FsLibrary;

/// Tunecast Server - share a music directory over DAAP.
#[derive(Parser, Debug)]
#[command(name = "tunecast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "TUNECAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Share name (overrides config file).
    #[arg(short, long, env = "TUNECAST_NAME")]
    name: Option<String>,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "TUNECAST_PORT")]
    port: Option<u16>,

    /// Music directory to share (overrides config file).
    #[arg(short = 'm', long, env = "TUNECAST_MUSIC_DIR")]
    music_dir: Option<PathBuf>,

    /// Disable mDNS advertisement.
    #[arg(long)]
    no_publish: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Tunecast Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // CLI overrides
    if let Some(name) = args.name {
        config.name = name;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(music_dir) = args.music_dir {
        config.music_dir = music_dir;
    }
    if args.no_publish {
        config.publish = false;
    }

    log::info!(
        "Configuration: name='{}', port={}, music_dir={}",
        config.name,
        config.port,
        config.music_dir.display()
    );

    let library = Arc::new(
        FsLibrary::new(&config.music_dir).with_context(|| {
            format!("Failed to scan music directory {}", config.music_dir.display())
        })?,
    );
    log::info!("Scanned {} track(s)", library.track_count());

    let server = DaapServer::new(
        config.to_core_config(),
        Arc::clone(&library) as Arc<dyn MediaLibrary>,
        Arc::new(LoggingEvents),
    )
    .context("Failed to configure server")?;

    let port = server.start().await.context("Failed to start server")?;
    log::info!("Sharing on port {}", port);

    // edits to the tree become revision bumps
    library.set_change_sender(server.change_sender());

    // optional periodic rescan
    if config.rescan_interval_secs > 0 {
        let library = Arc::clone(&library);
        let interval = Duration::from_secs(config.rescan_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                let library = Arc::clone(&library);
                // tag reading is blocking work
                let _ = tokio::task::spawn_blocking(move || library.rescan()).await;
            }
        });
    }

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    server.stop();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
