//! Configuration resolution for enginehub.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/enginehub/settings.json) or an explicit file
//! 3. Environment variables
//! 4. CLI arguments (applied by the daemon binary, highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::route::{EngineFamily, RouteTable, default_families};

/// Complete enginehub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default = "default_families")]
    pub engines: Vec<EngineFamily>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            engines: default_families(),
        }
    }
}

impl Config {
    /// Build the route table for the configured engine families.
    pub fn route_table(&self) -> RouteTable {
        RouteTable::new(self.engines.clone())
    }

    /// Reject configurations that cannot serve any session sensibly.
    pub fn validate(&self) -> Result<()> {
        if self.server.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        let mut names = std::collections::HashSet::new();
        let mut prefixes = std::collections::HashSet::new();
        for family in &self.engines {
            if family.name.is_empty() || family.route_prefix.is_empty() {
                return Err(Error::Config(
                    "engine families need a name and a route_prefix".into(),
                ));
            }
            if !names.insert(family.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate engine name {:?}",
                    family.name
                )));
            }
            if !prefixes.insert(family.route_prefix.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate route_prefix {:?}",
                    family.route_prefix
                )));
            }
        }
        Ok(())
    }
}

/// Server-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub bind_host: String,
    pub log_level: String,
    /// Upper bound on the pause between two outbound drain cycles.
    pub poll_interval_ms: u64,
    /// How long a child gets to exit after `quit` before it is killed.
    pub quit_grace_ms: u64,
    /// How long teardown waits for the output pump to finish.
    pub pump_join_timeout_ms: u64,
    /// Bound on the `isready`/`readyok` handshake.
    pub ready_timeout_ms: u64,
    /// Concurrent session cap, 0 for unlimited.
    pub max_sessions: usize,
    /// Relay the child's stderr along with its stdout.
    pub merge_stderr: bool,
    /// Directories prepended to the children's `LD_LIBRARY_PATH`.
    pub library_path: Vec<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_host: "0.0.0.0".to_string(),
            log_level: "info".to_string(),
            poll_interval_ms: 100,
            quit_grace_ms: 2000,
            pump_join_timeout_ms: 1000,
            ready_timeout_ms: 10_000,
            max_sessions: 0,
            merge_stderr: true,
            library_path: vec![PathBuf::from("/engines/maia/lib")],
        }
    }
}

impl ServerSettings {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn quit_grace(&self) -> Duration {
        Duration::from_millis(self.quit_grace_ms)
    }

    pub const fn pump_join_timeout(&self) -> Duration {
        Duration::from_millis(self.pump_join_timeout_ms)
    }

    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` must exist; the global file is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(global_path) if global_path.exists() => load_config_file(&global_path)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".enginehub").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/enginehub/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("enginehub").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(n) = var("ENGINEHUB_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = n;
    }
    if let Some(val) = var("ENGINEHUB_LOG_LEVEL") {
        config.server.log_level = val;
    }
    if let Some(n) = var("ENGINEHUB_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        config.server.poll_interval_ms = n;
    }
    if let Some(n) = var("ENGINEHUB_MAX_SESSIONS").and_then(|v| v.parse().ok()) {
        config.server.max_sessions = n;
    }
    if let Some(val) = var("ENGINEHUB_LIBRARY_PATH") {
        config.server.library_path = std::env::split_paths(&val).collect();
    }
}
