//! Unix-socket control server.
//!
//! Speaks newline-delimited JSON: requests are
//! `{"id": ..., "method": "...", "params": {}}` and answered methods get
//! `{"id": ..., "result": ...}` back on the same line-oriented stream.
//! Methods the orchestrator drops (resets, unknown names) produce no
//! response line at all, and malformed lines are skipped.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::orchestrator::OrchestratorHandle;

pub struct ControlServer {
    socket_path: PathBuf,
    handle: OrchestratorHandle,
}

impl ControlServer {
    pub fn new(socket_path: &Path, handle: OrchestratorHandle) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
            handle,
        }
    }

    /// Bind the socket and serve connections until the task is dropped.
    pub async fn run(self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).ok();
        }
        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("binding {}", self.socket_path.display()))?;
        info!(socket = %self.socket_path.display(), "control socket listening");

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let handle = self.handle.clone();
                    tokio::spawn(handle_connection(stream, handle));
                }
                Err(err) => {
                    warn!(error = %err, "control accept failed");
                }
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, handle: OrchestratorHandle) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request: serde_json::Value = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "malformed control line skipped");
                continue;
            }
        };
        let Some(method) = request.get("method").and_then(|m| m.as_str()) else {
            continue;
        };
        let id = request
            .get("id")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        match handle.control(method).await {
            Some(result) => {
                let response = serde_json::json!({ "id": id, "result": result });
                if writer
                    .write_all(format!("{response}\n").as_bytes())
                    .await
                    .is_err()
                {
                    return;
                }
                if writer.flush().await.is_err() {
                    return;
                }
            }
            None => {
                debug!(%method, "method produced no response");
            }
        }
    }
}
