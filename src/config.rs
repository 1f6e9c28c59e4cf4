use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::reconcile::VERIFY_INTERVAL;

fn config_path() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .context("cannot determine home directory")?
        .join(".burrow");
    fs::create_dir_all(&dir)?;
    Ok(dir.join("config.toml"))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend command (program followed by leading arguments)
    pub backend: Vec<String>,
    /// Seconds between checks for forwards that died
    pub verify_interval: u64,
    /// Seconds to wait for a single backend call (unset waits forever)
    pub backend_timeout: Option<u64>,
    /// Probe local ports of running forwards in `burrow list`
    pub probe_ports: bool,
    /// Default log filter when RUST_LOG is unset (e.g. "info", "burrow=debug")
    pub log_level: Option<String>,
    /// Shell for completions (bash, zsh, fish)
    pub shell: Option<String>,
    /// Editor for `burrow config` (overrides $VISUAL/$EDITOR)
    pub editor: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: vec!["easy-kpf-backend".to_string()],
            verify_interval: VERIFY_INTERVAL.as_secs(),
            backend_timeout: Some(30),
            probe_ports: true,
            log_level: None,
            shell: None,
            editor: None,
        }
    }
}

impl Config {
    /// Load config from ~/.burrow/config.toml, falling back to defaults.
    pub fn load() -> Self {
        let path = match config_path() {
            Ok(p) => p,
            Err(_) => return Self::default(),
        };
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    fn parse(content: &str) -> Self {
        toml::from_str(content).unwrap_or_default()
    }

    pub fn verify_period(&self) -> Duration {
        Duration::from_secs(self.verify_interval.max(1))
    }

    pub fn backend_timeout(&self) -> Option<Duration> {
        self.backend_timeout.filter(|&s| s > 0).map(Duration::from_secs)
    }

    /// Resolve which editor to use: config > $VISUAL > $EDITOR > vi
    pub fn resolve_editor(&self) -> String {
        if let Some(ref e) = self.editor {
            return e.clone();
        }
        std::env::var("VISUAL")
            .or_else(|_| std::env::var("EDITOR"))
            .unwrap_or_else(|_| "vi".to_string())
    }

    /// Write a default config file if none exists. Returns the path.
    pub fn init() -> Result<PathBuf> {
        let path = config_path()?;
        if path.exists() {
            return Ok(path);
        }
        let default = Self::default();
        let content = toml::to_string_pretty(&default)
            .context("failed to serialize default config")?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}
