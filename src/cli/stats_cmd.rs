//! Show or reset the persisted traffic statistics.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::cli::output::{self, Styled};
use crate::config;

/// Fetch the counters over the control socket. With `reset`, zero them
/// first; the reset request itself produces no reply line, so the one
/// response we read back is the fresh snapshot.
pub async fn run(reset: bool) -> Result<()> {
    let s = Styled::new();

    let stream = match UnixStream::connect(config::socket_path()).await {
        Ok(stream) => stream,
        Err(_) => {
            if output::is_json() {
                output::print_json(&serde_json::json!({
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

    let mut request = String::new();
    if reset {
        request.push_str("{\"id\":\"reset\",\"method\":\"stats.reset\",\"params\":{}}\n");
    }
    request.push_str("{\"id\":\"stats\",\"method\":\"stats\",\"params\":{}}\n");
    writer
        .write_all(request.as_bytes())
        .await
        .context("failed to send stats request")?;
    writer.flush().await?;

    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .context("failed to read stats response")?;

    let resp: serde_json::Value =
        serde_json::from_str(line.trim()).context("invalid stats response")?;

    if output::is_json() {
        output::print_json(&resp);
        return Ok(());
    }

    let Some(result) = resp.get("result") else {
        bail!("malformed stats response");
    };

    let visited = result
        .get("visited_sites")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let clicked = result
        .get("clicked_links")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let searches = result
        .get("keyword_searches")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    eprintln!();
    if reset {
        eprintln!("  {} Statistics reset.", s.ok_sym());
        eprintln!();
    }
    output::print_section(&s, "Traffic");
    output::print_check(" ", "Visited:", &format!("{visited} sites"));
    output::print_check(" ", "Clicked:", &format!("{clicked} links"));
    output::print_check(" ", "Searches:", &format!("{searches} keyword queries"));

    Ok(())
}
