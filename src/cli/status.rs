//! Show status of the running chaff daemon.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::cli::output::{self, Styled};
use crate::config;

/// Connect to the control socket and display runtime status.
pub async fn run() -> Result<()> {
    let s = Styled::new();

    let stream = match UnixStream::connect(config::socket_path()).await {
        Ok(stream) => stream,
        Err(_) => {
            if output::is_json() {
                output::print_json(&serde_json::json!({
                    "running": false,
                    "error": "not running"
                }));
                return Ok(());
            }
            eprintln!("  chaff is not running. Start with 'chaff start'.");
            std::process::exit(1);
        }
    };

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Send status request
    let req = r#"{"id":"status","method":"status","params":{}}"#;
    writer
        .write_all(format!("{req}\n").as_bytes())
        .await
        .context("failed to send status request")?;
    writer.flush().await?;

    // Read response
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .context("failed to read status response")?;

    let resp: serde_json::Value =
        serde_json::from_str(line.trim()).context("invalid status response")?;

    if output::is_json() {
        output::print_json(&resp);
        return Ok(());
    }

    let Some(result) = resp.get("result") else {
        bail!("malformed status response");
    };

    let version = result
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or("?");
    let uptime = result.get("uptime_s").and_then(|v| v.as_u64()).unwrap_or(0);
    let scheduler = result
        .get("scheduler")
        .and_then(|v| v.as_str())
        .unwrap_or("?");
    let open = result
        .get("open_sessions")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let capacity = result.get("capacity").and_then(|v| v.as_u64()).unwrap_or(0);
    let queued = result
        .get("queued_origins")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let observed = result
        .get("observed_origins")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let endpoints = result
        .get("observed_endpoints")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let terms = result
        .get("harvested_terms")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let daily = result
        .get("daily_connections")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let daily_limit = result
        .get("daily_limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    // Read PID from PID file
    let pid = std::fs::read_to_string(config::pid_path())
        .ok()
        .and_then(|p| p.trim().parse::<i32>().ok());
    let pid_str = pid.map(|p| format!("PID {p}, ")).unwrap_or_default();

    eprintln!();
    eprintln!(
        "  {} — {} ({pid_str}uptime {})",
        s.bold(&format!("chaff v{version}")),
        s.green("running"),
        output::format_duration(uptime)
    );
    eprintln!();

    output::print_section(&s, "Sessions");
    output::print_check(" ", "Open:", &format!("{open} / {capacity} tabs"));
    if let Some(sessions) = result.get("sessions").and_then(|v| v.as_array()) {
        for sess in sessions {
            let origin = sess.get("origin").and_then(|v| v.as_str()).unwrap_or("?");
            let algorithm = sess.get("algorithm").and_then(|v| v.as_str()).unwrap_or("?");
            let open_s = sess.get("open_s").and_then(|v| v.as_u64()).unwrap_or(0);
            output::print_check(
                " ",
                "",
                &s.dim(&format!(
                    "{origin} ({algorithm}, up {})",
                    output::format_duration(open_s)
                )),
            );
        }
    }
    output::print_check(" ", "Scheduler:", scheduler);
    let budget = format!("{daily} / {daily_limit} connections today");
    if daily_limit > 0 && daily >= daily_limit {
        output::print_check(" ", "Budget:", &s.yellow(&budget));
    } else {
        output::print_check(" ", "Budget:", &budget);
    }
    eprintln!();

    output::print_section(&s, "Discovery");
    output::print_check(" ", "Queued:", &format!("{queued} origins"));
    output::print_check(
        " ",
        "Observed:",
        &format!("{observed} third parties, {endpoints} endpoints"),
    );
    output::print_check(" ", "Terms:", &format!("{terms} harvested"));

    // Session log
    let log_path = config::chaff_home().join("sessions.jsonl");
    if log_path.exists() {
        if let Ok(meta) = log_path.metadata() {
            eprintln!();
            eprintln!(
                "  Session log: {} ({})",
                log_path.display(),
                output::format_size(meta.len())
            );
        }
    }

    Ok(())
}
