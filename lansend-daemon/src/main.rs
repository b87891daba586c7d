use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use lansend_daemon::cert_store::CertificateStore;
use lansend_daemon::config::{LogFormat, Settings};
use lansend_daemon::engine::{run_poll_loop, TransferEngine};
use lansend_daemon::event_bus::EventBus;
use lansend_daemon::metadata::TransferMetadataStore;
use lansend_daemon::pipe::spawn_pipe_threads;
use lansend_daemon::platform;
use lansend_daemon::server::Server;

#[derive(Parser)]
#[command(name = "lansend")]
#[command(about = "LanSend daemon - pinned-TLS LAN file transfer")]
struct Cli {
    /// Pipe the host UI writes operations into
    #[arg(long)]
    stdin_pipe_name: Option<String>,

    /// Pipe the daemon writes notifications into
    #[arg(long)]
    stdout_pipe_name: Option<String>,

    /// Config directory (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overrides the configured level
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    if let Err(e) = run() {
        error!("fatal: {:#}", e);
        eprintln!("lansend: {:#}", e);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = cli.config.unwrap_or_else(platform::default_config_dir);
    let settings = Settings::load_or_init(&config_dir)?;

    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&settings.logging.level)
        .to_string();
    match settings.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(log_level)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(log_level).init();
        }
    }

    info!("starting lansend v{}", env!("CARGO_PKG_VERSION"));
    info!("configuration loaded from {:?}", config_dir);

    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let bus = Arc::new(EventBus::new());

    let certs = Arc::new(
        CertificateStore::init(Settings::certs_dir(&config_dir))
            .context("failed to initialize security context")?,
    );
    info!("device fingerprint: {}", certs.fingerprint());

    let store = Arc::new(
        TransferMetadataStore::new(Settings::metadata_dir(&config_dir))
            .context("failed to open metadata store")?,
    );

    let incomplete = store.list_incomplete().unwrap_or_default();
    if !incomplete.is_empty() {
        info!(
            "{} interrupted transfer(s) on disk, resumable on request",
            incomplete.len()
        );
    }

    let engine = TransferEngine::new(bus.clone(), store, certs, settings, config_dir)
        .context("failed to construct transfer engine")?;

    if let (Some(stdin_pipe), Some(stdout_pipe)) = (cli.stdin_pipe_name, cli.stdout_pipe_name) {
        spawn_pipe_threads(
            PathBuf::from(stdin_pipe),
            PathBuf::from(stdout_pipe),
            bus.clone(),
        );
    } else {
        info!("no host pipes configured, running headless");
    }

    // The host learns our effective settings first.
    engine.emit_settings();

    let server = Server::new(engine.clone());
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("server stopped: {}", e);
            std::process::exit(1);
        }
    });

    let poll_task = tokio::spawn(run_poll_loop(engine.clone()));

    tokio::select! {
        _ = engine.wait_for_shutdown() => {
            info!("shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            engine.request_shutdown();
        }
    }

    server_task.abort();
    poll_task.abort();

    info!("lansend stopped");
    Ok(())
}
