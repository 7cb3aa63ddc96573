//! JSONL session log — append-only record of dispatch activity.
//!
//! One line per lifecycle event (dispatch, release, external tab close),
//! so a run can be reconstructed after the fact without raising the
//! tracing verbosity.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::host::TabId;
use crate::pool::Algorithm;

/// A single session lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub timestamp: String,
    pub event: String,
    pub origin: Option<String>,
    pub tab: Option<String>,
    pub algorithm: Option<String>,
    pub detail: Option<String>,
}

/// Append-only JSONL session logger.
pub struct SessionLog {
    file: File,
}

impl SessionLog {
    /// Open or create the session log file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open session log: {}", path.display()))?;

        Ok(Self { file })
    }

    /// Open the default session log at ~/.chaff/sessions.jsonl.
    pub fn default_log() -> Result<Self> {
        Self::open(&crate::config::chaff_home().join("sessions.jsonl"))
    }

    /// Append one record.
    pub fn log(&mut self, record: &SessionRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        writeln!(self.file, "{json}")?;
        Ok(())
    }

    /// Append a lifecycle event with the current timestamp.
    pub fn record(
        &mut self,
        event: &str,
        origin: Option<&str>,
        tab: Option<TabId>,
        algorithm: Option<Algorithm>,
        detail: Option<&str>,
    ) -> Result<()> {
        self.log(&SessionRecord {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            origin: origin.map(String::from),
            tab: tab.map(|t| t.to_string()),
            algorithm: algorithm.map(|a| a.to_string()),
            detail: detail.map(String::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_are_one_json_line_each() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.jsonl");
        let mut log = SessionLog::open(&path).unwrap();
        log.record(
            "dispatched",
            Some("https://example.com"),
            Some(TabId(3)),
            Some(Algorithm::Search),
            None,
        )
        .unwrap();
        log.record("released", Some("https://example.com"), Some(TabId(3)), None, Some("disconnect"))
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "dispatched");
        assert_eq!(first["tab"], "tab-3");
        assert_eq!(first["algorithm"], "search");
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("sessions.jsonl");
        SessionLog::open(&path).unwrap();
        assert!(path.exists());
    }
}
