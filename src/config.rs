//! Runtime settings and well-known paths under the chaff home directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::orchestrator::timer::JitterRange;

/// Get the chaff home directory (~/.chaff/).
pub fn chaff_home() -> PathBuf {
    if let Ok(p) = std::env::var("CHAFF_HOME") {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".chaff")
}

pub fn config_path() -> PathBuf {
    chaff_home().join("config.json")
}

pub fn stats_path() -> PathBuf {
    chaff_home().join("stats.json")
}

pub fn pid_path() -> PathBuf {
    chaff_home().join("chaff.pid")
}

pub fn socket_path() -> PathBuf {
    PathBuf::from("/tmp/chaff.sock")
}

/// Everything the daemon reads once at startup. Mid-run edits to the
/// config file take effect on the next start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Pool capacity — how many decoy sessions may be open at once.
    pub max_connect_count: usize,
    /// Sessions allowed per calendar day. 0 stops dispatch entirely.
    pub daily_connection_limit: u64,
    /// Pause between scheduler passes.
    pub dispatch_delay: JitterRange,
    /// Pause before a session worker touches a settled page.
    pub behavior_delay: JitterRange,
    /// Origins fed to the discovery queue at startup, before passive
    /// observation has found anything.
    pub seed_origins: Vec<String>,
    /// Run the browser headless.
    pub headless: bool,
    /// Explicit Chromium executable; autodetected when unset.
    pub chromium_path: Option<PathBuf>,
    /// Attach to a running browser over CDP instead of launching one.
    pub connect_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_connect_count: 3,
            daily_connection_limit: 120,
            dispatch_delay: JitterRange {
                min_ms: 10_000,
                max_ms: 15_000,
            },
            behavior_delay: JitterRange {
                min_ms: 2_000,
                max_ms: 6_000,
            },
            seed_origins: Vec::new(),
            headless: true,
            chromium_path: None,
            connect_url: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Load from `path`, writing the defaults there on first run so the
    /// file exists for editing.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let defaults = Self::default();
        defaults.save(path)?;
        Ok(defaults)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }
}
