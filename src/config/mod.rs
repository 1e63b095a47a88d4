use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Adaptor configuration: lifecycle timeouts, worker executable selection
/// and client-script search directories.
///
/// Timeouts are fractional seconds so tests and unusual deployments can go
/// below one second. The defaults mirror a render-farm deployment: a day for
/// worker start (scene loads can be enormous), half a minute for everything
/// else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptorConfig {
    /// Bound on waiting for the action-channel server to publish its socket
    pub server_start_timeout_s: f64,

    /// Bound on joining the server task during cleanup
    pub server_end_timeout_s: f64,

    /// Bound on the worker draining its initialization actions
    pub worker_start_timeout_s: f64,

    /// Bound on the worker exiting after the close action during cleanup
    pub worker_end_timeout_s: f64,

    /// Worker interpreter executable, resolved through PATH
    pub executable: String,

    /// Per-Maya-version executable overrides, keyed by major version
    pub executable_overrides: IndexMap<String, Utf8PathBuf>,

    /// Directories searched for the client entry-point script, tried before
    /// the built-in defaults
    pub client_search_paths: Vec<Utf8PathBuf>,
}

impl Default for AdaptorConfig {
    fn default() -> Self {
        Self {
            server_start_timeout_s: 30.0,
            server_end_timeout_s: 30.0,
            worker_start_timeout_s: 86_400.0,
            worker_end_timeout_s: 30.0,
            executable: "mayapy".to_string(),
            executable_overrides: IndexMap::new(),
            client_search_paths: Vec::new(),
        }
    }
}

impl AdaptorConfig {
    /// Load configuration from a YAML file.
    ///
    /// A missing file is not an error: defaults are returned with a warning,
    /// so a bare deployment works out of the box.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path))?;
        let config: Self = serde_yaml_ng::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path))?;

        tracing::info!("Loaded config from {}", path);
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let contents =
            serde_yaml_ng::to_string(self).context("Failed to serialize config to YAML")?;
        fs::write(path, contents).with_context(|| format!("Failed to write config: {}", path))?;
        Ok(())
    }

    /// The worker executable for the given Maya version.
    ///
    /// Falls back to the unversioned executable when no override matches.
    pub fn executable_for(&self, version: Option<u32>) -> &str {
        version
            .and_then(|v| self.executable_overrides.get(&v.to_string()))
            .map(|p| p.as_str())
            .unwrap_or(&self.executable)
    }

    pub fn server_start_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.server_start_timeout_s)
    }

    pub fn server_end_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.server_end_timeout_s)
    }

    pub fn worker_start_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.worker_start_timeout_s)
    }

    pub fn worker_end_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.worker_end_timeout_s)
    }
}
