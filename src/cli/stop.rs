//! Stop the running chaff daemon.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::cli::output::{self, Styled};
use crate::config;

/// Stop the chaff daemon by reading the PID file and sending SIGTERM.
pub async fn run() -> Result<()> {
    let s = Styled::new();
    let pid_path = config::pid_path();
    let socket_path = config::socket_path();

    if !pid_path.exists() {
        if !output::is_quiet() {
            eprintln!("  chaff is not running.");
        }
        // Nothing to stop is a clean exit
        return Ok(());
    }

    let pid_str = std::fs::read_to_string(&pid_path).context("failed to read PID file")?;
    let pid: i32 = pid_str.trim().parse().context("invalid PID in PID file")?;

    // Check if process is actually alive
    #[cfg(unix)]
    {
        let alive = std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);

        if !alive {
            // Stale PID file; clean up
            let _ = std::fs::remove_file(&pid_path);
            let _ = std::fs::remove_file(&socket_path);
            if !output::is_quiet() {
                eprintln!("  Cleaned up stale PID file (process {pid} was not running).");
            }
            return Ok(());
        }
    }

    if !output::is_quiet() {
        eprint!("  Stopping chaff (PID {pid})...");
    }

    // Send SIGTERM
    #[cfg(unix)]
    {
        let output = std::process::Command::new("kill")
            .arg(pid.to_string())
            .output()
            .context("failed to send SIGTERM")?;
        if !output.status.success() {
            let _ = std::fs::remove_file(&pid_path);
            if !output::is_quiet() {
                eprintln!(" {}", s.warn_sym());
                eprintln!("  Process may have already exited. Cleaned up PID file.");
            }
            return Ok(());
        }
    }

    // Wait up to 5 seconds for the daemon to close its tabs and persist
    // counters
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        #[cfg(unix)]
        {
            let output = std::process::Command::new("kill")
                .args(["-0", &pid.to_string()])
                .output();
            match output {
                Ok(o) if !o.status.success() => {
                    // Process has exited
                    let _ = std::fs::remove_file(&pid_path);
                    let _ = std::fs::remove_file(&socket_path);
                    if !output::is_quiet() {
                        eprintln!(" {}", s.ok_sym());
                        eprintln!("  chaff stopped.");
                    }
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    // Timed out
    let _ = std::fs::remove_file(&pid_path);
    if !output::is_quiet() {
        eprintln!(" {}", s.warn_sym());
        eprintln!("  chaff may still be running. PID file removed.");
        eprintln!("  If the problem persists, try: kill -9 {pid}");
    }
    Ok(())
}
