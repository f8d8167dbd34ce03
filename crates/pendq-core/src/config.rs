use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Backoff parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay in milliseconds before the first retry.
    pub initial_delay_ms: u64,
    /// Ceiling for the exponential backoff delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5_000,
            max_delay_ms: 2 * 60 * 60 * 1000,
        }
    }
}

impl BackoffConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Global configuration loaded from `~/.config/pendq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendqConfig {
    /// How long a message may keep retrying, in seconds, measured from
    /// when it was first queued. Outside this window it fails out.
    pub resend_window_secs: u64,
    /// Capacity of the background work queue; enqueues beyond this are
    /// rejected and retried later.
    pub queue_capacity: usize,
    /// Optional backoff tuning; if missing, built-in defaults are used.
    #[serde(default)]
    pub backoff: Option<BackoffConfig>,
}

impl Default for PendqConfig {
    fn default() -> Self {
        Self {
            resend_window_secs: 20 * 60,
            queue_capacity: 8,
            backoff: None,
        }
    }
}

impl PendqConfig {
    pub fn resend_window(&self) -> Duration {
        Duration::from_secs(self.resend_window_secs)
    }

    pub fn backoff(&self) -> BackoffConfig {
        self.backoff.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("pendq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<PendqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = PendqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: PendqConfig = toml::from_str(&data)?;
    Ok(cfg)
}
