//! Configuration loading and filesystem layout.
//!
//! Everything lives under `~/.playgate`:
//! - `config.toml` : grant duration, sweep period, gate set
//! - `store.json` : the shared key-value store
//! - `daemon.sock` : the daemon's request socket
//! - `logs/` : front-end log files

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GateError, Result};

pub const SOCKET_ENV: &str = "PLAYGATE_SOCKET";

const DATA_DIR_NAME: &str = ".playgate";
const CONFIG_FILE: &str = "config.toml";
const STORE_FILE: &str = "store.json";
const SOCKET_NAME: &str = "daemon.sock";
const LOG_DIR: &str = "logs";

const DEFAULT_GRANT_SECS: u64 = 30 * 60;
const DEFAULT_RECONCILIATION_SECS: u64 = 60;
const DEFAULT_STORE_POLL_MS: u64 = 500;
const DEFAULT_GATED_DOMAINS: [&str; 4] = ["youtube.com", "reddit.com", "twitch.tv", "instagram.com"];

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GateConfig {
    #[serde(default)]
    pub grant: GrantConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub gate: GateSet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrantConfig {
    #[serde(default = "default_grant_secs")]
    pub duration_secs: u64,
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_GRANT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    #[serde(default = "default_reconciliation_secs")]
    pub period_secs: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            period_secs: DEFAULT_RECONCILIATION_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// How often a process re-reads the store file to pick up writes made
    /// by the other process.
    #[serde(default = "default_store_poll_ms")]
    pub store_poll_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            store_poll_ms: DEFAULT_STORE_POLL_MS,
        }
    }
}

/// Static set of gated resource identifiers (domains).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GateSet {
    #[serde(default = "default_domains")]
    pub domains: Vec<String>,
}

impl Default for GateSet {
    fn default() -> Self {
        Self {
            domains: default_domains(),
        }
    }
}

impl GateSet {
    pub fn contains(&self, domain: &str) -> bool {
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        self.domains.iter().any(|gated| {
            domain == *gated
                || domain
                    .strip_suffix(gated.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

impl GateConfig {
    pub fn grant_duration(&self) -> Duration {
        Duration::from_secs(self.grant.duration_secs)
    }

    pub fn reconciliation_period(&self) -> Duration {
        Duration::from_secs(self.reconciliation.period_secs)
    }

    pub fn store_poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch.store_poll_ms)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let reject = |details: &str| GateError::ConfigMalformed {
            path: path.to_path_buf(),
            details: details.to_string(),
        };
        if self.grant.duration_secs == 0 {
            return Err(reject("grant.duration_secs must be greater than zero"));
        }
        if self.reconciliation.period_secs == 0 {
            return Err(reject(
                "reconciliation.period_secs must be greater than zero",
            ));
        }
        if self.watch.store_poll_ms == 0 {
            return Err(reject("watch.store_poll_ms must be greater than zero"));
        }
        Ok(())
    }
}

/// Loads the config file, returning defaults when it does not exist.
pub fn load_config(path: Option<PathBuf>) -> Result<GateConfig> {
    let config_path = match path {
        Some(path) => path,
        None => config_path()?,
    };

    if !config_path.exists() {
        return Ok(GateConfig::default());
    }

    let content = fs_err::read_to_string(&config_path)
        .map_err(|err| GateError::io(format!("read {}", config_path.display()), err))?;
    let mut config: GateConfig =
        toml::from_str(&content).map_err(|err| GateError::ConfigMalformed {
            path: config_path.clone(),
            details: err.to_string(),
        })?;
    for domain in &mut config.gate.domains {
        *domain = domain.trim().to_ascii_lowercase();
    }
    config.gate.domains.retain(|domain| !domain.is_empty());
    config.validate(&config_path)?;
    Ok(config)
}

/// Returns `~/.playgate`.
pub fn data_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DATA_DIR_NAME))
        .ok_or(GateError::HomeDirNotFound)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(CONFIG_FILE))
}

pub fn store_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(STORE_FILE))
}

pub fn log_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join(LOG_DIR))
}

/// Socket path, honoring the `PLAYGATE_SOCKET` override.
pub fn socket_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(data_dir()?.join(SOCKET_NAME))
}

fn default_grant_secs() -> u64 {
    DEFAULT_GRANT_SECS
}

fn default_reconciliation_secs() -> u64 {
    DEFAULT_RECONCILIATION_SECS
}

fn default_store_poll_ms() -> u64 {
    DEFAULT_STORE_POLL_MS
}

fn default_domains() -> Vec<String> {
    DEFAULT_GATED_DOMAINS
        .iter()
        .map(|domain| domain.to_string())
        .collect()
}
