//! Start the chaff daemon process.

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{info, warn};

use crate::cli::output::{self, Styled};
use crate::config::{self, Settings};
use crate::host::chromium::CdpHost;
use crate::orchestrator::Orchestrator;
use crate::server::ControlServer;
use crate::session_log::SessionLog;
use crate::stats::StatisticsStore;

/// Check if chaff is already running. Returns the PID if so.
pub fn check_already_running() -> Option<i32> {
    let pid_path = config::pid_path();
    if !pid_path.exists() {
        return None;
    }
    let pid_str = std::fs::read_to_string(&pid_path).ok()?;
    let pid: i32 = pid_str.trim().parse().ok()?;

    // Check if the process is actually alive
    #[cfg(unix)]
    {
        let output = std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output();
        if matches!(output, Ok(o) if o.status.success()) {
            return Some(pid);
        }
    }

    // Stale PID file; clean up
    let _ = std::fs::remove_file(&pid_path);
    None
}

/// Start the chaff daemon: launch the browser, bind the control socket,
/// write the PID file, and run the orchestrator until signalled.
pub async fn run() -> Result<()> {
    let s = Styled::new();

    // Check if already running
    if let Some(pid) = check_already_running() {
        eprintln!("  {} chaff is already running (PID {pid}).", s.warn_sym());
        eprintln!("  Use 'chaff restart' or 'chaff stop' first.");
        std::process::exit(1);
    }

    // Clean up stale socket file
    let socket_path = config::socket_path();
    if socket_path.exists() {
        std::fs::remove_file(&socket_path).ok();
    }

    // Ensure ~/.chaff/ exists
    let pid_path = config::pid_path();
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chaff_runtime=info".parse().unwrap()),
        )
        .init();

    info!("starting chaff v{}", env!("CARGO_PKG_VERSION"));

    let settings =
        Settings::load_or_init(&config::config_path()).context("loading configuration")?;

    // Write PID file
    std::fs::write(&pid_path, std::process::id().to_string())
        .context("failed to write PID file")?;

    let today = Local::now().date_naive();
    let stats = StatisticsStore::load(&config::stats_path(), today);
    let log = match SessionLog::default_log() {
        Ok(log) => Some(log),
        Err(err) => {
            warn!(error = %err, "session log unavailable, continuing without it");
            None
        }
    };

    let (host, host_rx) = CdpHost::launch(&settings).await?;
    let (orchestrator, handle) = Orchestrator::new(settings, host.clone(), host_rx, stats, log);

    if !output::is_quiet() {
        eprintln!(
            "  {} chaff v{} started (PID {})",
            s.ok_sym(),
            env!("CARGO_PKG_VERSION"),
            std::process::id()
        );
        eprintln!("  Listening on {}", socket_path.display());
    }

    // Set up SIGTERM/SIGINT handling
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let ctrl_c = tokio::signal::ctrl_c();
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
        info!("received shutdown signal");
        shutdown_handle.shutdown();
    });

    // Run the control socket alongside the orchestrator
    let server = ControlServer::new(&socket_path, handle);
    let server_task = tokio::spawn(server.run());

    let result = orchestrator.run().await;

    // Clean up on exit
    server_task.abort();
    host.shutdown().await;
    let _ = std::fs::remove_file(&pid_path);
    let _ = std::fs::remove_file(&socket_path);

    if !output::is_quiet() {
        eprintln!("  {} chaff stopped.", s.ok_sym());
    }

    result
}
