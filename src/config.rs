//! Config module - Manages lockbox configuration (lockbox.toml).
//!
//! Configuration file contains:
//! - Store file path
//! - Idle auto-lock settings
//! - Recovery settings (TTL, origin host)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Idle auto-lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Whether the idle timer runs at all (manual lock always works)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds without activity before locking (default: 900)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout_secs() -> u64 {
    900
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl LockConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Passphrase recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Days a recovery record stays valid (default: 30)
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
    /// Origin host the recovery key is bound to (default: machine hostname)
    #[serde(default)]
    pub origin: Option<String>,
}

fn default_ttl_days() -> u32 {
    30
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
            origin: None,
        }
    }
}

impl RecoveryConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.ttl_days))
    }

    /// Configured origin, falling back to this machine's hostname.
    pub fn origin_host(&self) -> String {
        self.origin.clone().unwrap_or_else(default_origin)
    }
}

/// Hostname of this machine, used as the default recovery origin.
pub fn default_origin() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Main lockbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config version (for future migrations)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Path to the store file
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            store_path: default_store_path(),
            lock: LockConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

/// Get default store path.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("lockbox").join("store.json"))
        .unwrap_or_else(|| PathBuf::from("./lockbox-store.json"))
}

/// Get default config directory (~/.config/lockbox/).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("lockbox"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get default config file path.
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("lockbox.toml")
}

impl Config {
    /// Create new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config with specific store path.
    pub fn with_store_path(store_path: PathBuf) -> Self {
        Self {
            store_path,
            ..Self::default()
        }
    }

    /// Load config from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Cannot parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).with_context(|| "Cannot serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("Cannot write config file: {}", path.display()))?;

        // Restrict file permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}
