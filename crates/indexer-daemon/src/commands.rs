//! Command implementations for the spool indexer.
//!
//! Handles:
//! - start: Load config, build the pipeline, run the orchestrator loop
//! - stop: Signal running daemon to stop (via PID file)
//! - status: Check if daemon is running
//! - ping: One health check against the search engine

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use indexer_pipeline::{HealthStatus, Orchestrator, SearchWriter, WriterConfig};
use indexer_types::Settings;

use crate::cli::StartArgs;

/// PID file of the running daemon.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// `<runtime dir>/spool-indexer/daemon.pid`, falling back to the cache dir.
    fn locate() -> Self {
        let dir = ProjectDirs::from("", "", "spool-indexer")
            .map(|dirs| dirs.runtime_dir().unwrap_or(dirs.cache_dir()).to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("spool-indexer"));
        Self {
            path: dir.join("daemon.pid"),
        }
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, std::process::id().to_string())?;
        info!(path = %self.path.display(), "Wrote PID file");
        Ok(())
    }

    fn read(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Removed PID file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "Failed to remove PID file"),
        }
    }
}

/// Send `signal` to `pid`; signal 0 only checks that the process exists.
#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, signal) == 0 }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    send_signal(pid, 0)
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Apply `start` flags on top of loaded settings.
pub fn apply_start_overrides(settings: &mut Settings, args: &StartArgs) {
    if let Some(root) = &args.event_folder_root {
        settings.event_folder_root = root.clone();
    }
    if let Some(ordering) = &args.folder_ordering {
        settings.folder_ordering = ordering.clone();
    }
    if let Some(processes) = args.num_processes {
        settings.num_processes = processes;
    }
    if let Some(pools) = args.num_pools {
        settings.num_pools = pools;
    }
    if let Some(service) = &args.index_service {
        settings.index_service = service.clone();
    }
    if let Some(url) = &args.solr_update_url {
        settings.solr_update_url = url.clone();
    }
    if args.dont_add_last_indexed {
        settings.add_last_indexed = false;
    }
}

/// Load settings, apply CLI overrides and validate the result.
pub fn load_settings(
    config_path: Option<&str>,
    args: &StartArgs,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    apply_start_overrides(&mut settings, args);
    if let Some(level) = log_level_override {
        settings.log_level = level.to_string();
    }
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Start the indexer.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Build the content source, search writer and pools
/// 3. Run the orchestrator until SIGINT/SIGTERM, then drain
pub async fn start_daemon(
    config_path: Option<&str>,
    args: &StartArgs,
    log_level_override: Option<&str>,
) -> Result<()> {
    let settings = load_settings(config_path, args, log_level_override)?;
    init_logging(&settings.log_level)?;

    info!(
        event_folder_root = %settings.event_folder_root,
        folder_ordering = %settings.folder_ordering,
        num_pools = settings.num_pools,
        num_processes = settings.num_processes,
        index_service = %settings.index_service,
        solr_update_url = %settings.solr_update_url,
        add_last_indexed = settings.add_last_indexed,
        "Spool indexer starting"
    );

    if !args.foreground {
        warn!("Background mode not implemented, running in foreground");
        warn!("Use a process manager (systemd, supervisord) for background operation");
    }

    let root = settings.expanded_event_root();
    if !root.is_dir() {
        anyhow::bail!("Event folder root {} is not a directory", root.display());
    }

    let cancel = CancellationToken::new();
    let mut orchestrator = Orchestrator::from_settings(&settings, cancel.clone())
        .context("Failed to build indexing pipeline")?;

    let pid_file = PidFile::locate();
    pid_file.write()?;

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    orchestrator.run().await;

    pid_file.remove();
    info!("Spool indexer stopped");
    Ok(())
}

/// Stop the running daemon by sending SIGTERM.
pub fn stop_daemon() -> Result<()> {
    let pid_file = PidFile::locate();
    let pid = pid_file
        .read()
        .context("No PID file found - daemon may not be running")?;

    if !is_process_running(pid) {
        pid_file.remove();
        anyhow::bail!("Daemon not running (stale PID file removed)");
    }

    #[cfg(unix)]
    {
        if !send_signal(pid, libc::SIGTERM) {
            anyhow::bail!("Failed to send SIGTERM to daemon");
        }
        println!("Sent SIGTERM to daemon (PID {})", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command not implemented on this platform");
    }

    Ok(())
}

/// Show daemon status.
pub fn show_status() -> Result<()> {
    let pid_file = PidFile::locate();

    match pid_file.read() {
        Some(pid) if is_process_running(pid) => {
            println!("Spool indexer is running (PID {})", pid);
            println!("PID file: {}", pid_file.path.display());
        }
        Some(pid) => {
            println!(
                "Spool indexer is NOT running (stale PID {} in {})",
                pid,
                pid_file.path.display()
            );
        }
        None => {
            println!("Spool indexer is NOT running (no PID file)");
        }
    }
    Ok(())
}

/// Ping the search engine once.
pub async fn check_engine(
    config_path: Option<&str>,
    solr_update_url: Option<&str>,
) -> Result<HealthStatus> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(url) = solr_update_url {
        settings.solr_update_url = url.to_string();
    }

    let writer = SearchWriter::new(WriterConfig::from_settings(&settings))
        .context("Invalid search engine URL")?;
    let status = writer.check_health().await;
    println!("{}: {}", writer.ping_endpoint(), status);
    Ok(status)
}
