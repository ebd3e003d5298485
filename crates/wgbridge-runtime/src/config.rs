// ============================================
// File: crates/wgbridge-runtime/src/config.rs
// ============================================
//! # Runtime Configuration
//!
//! ## Creation Reason
//! Collects the tunables of the registry, reactor and rebind service in
//! one TOML-backed structure. Hosts rarely ship a file; every field has a
//! default that matches mobile-host behaviour.
//!
//! ## Configuration Sections
//! - `tunnel`: Default MTU, handle ceiling, default roaming policy
//! - `reactor`: Debounce interval, route socket watching
//! - `rebind`: Attempt count and spacing for socket rebinds
//! - `logging`: `tracing` filter level
//!
//! ## Example Configuration
//! ```toml
//! [tunnel]
//! default_mtu = 1280
//! max_tunnels = 16
//! roaming = false
//!
//! [reactor]
//! debounce_ms = 1000
//! watch_routes = true
//!
//! [rebind]
//! max_attempts = 10
//! retry_interval_ms = 500
//!
//! [logging]
//! level = "info"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The bridge reads the file named by `WGBRIDGE_CONFIG` once, at install
//! - A missing variable means defaults; a broken file is reported and
//!   defaults are used, the host must still get a working tunnel
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use wgbridge_core::TunnelHandle;
use wgbridge_transport::traits::MIN_MTU;

use crate::error::{Result, RuntimeError};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "WGBRIDGE_CONFIG";

// ============================================
// RuntimeConfig
// ============================================

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Tunnel defaults and limits.
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Network-change reactor.
    #[serde(default)]
    pub reactor: ReactorConfig,

    /// Socket rebind retries.
    #[serde(default)]
    pub rebind: RebindConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `ConfigLoad` if the file cannot be read or parsed, and
    /// `ConfigInvalid` if a value is out of range.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| RuntimeError::config_load(&path_str, e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads from `WGBRIDGE_CONFIG` if it is set, defaults otherwise.
    ///
    /// # Errors
    /// Same as [`RuntimeConfig::load`].
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Validates every section.
    ///
    /// # Errors
    /// Returns `ConfigInvalid` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        self.tunnel.validate()?;
        self.reactor.validate()?;
        self.rebind.validate()?;
        Ok(())
    }

    /// Serializes configuration to a TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl FromStr for RuntimeConfig {
    type Err = RuntimeError;

    /// Parses and validates TOML text. Errors as [`RuntimeConfig::load`].
    fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RuntimeError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================
// TunnelConfig
// ============================================

/// Tunnel defaults and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// MTU for callback devices whose host passes 0.
    #[serde(default = "default_mtu")]
    pub default_mtu: u16,

    /// Maximum number of live tunnels.
    #[serde(default = "default_max_tunnels")]
    pub max_tunnels: usize,

    /// Whether new tunnels allow endpoint roaming.
    #[serde(default)]
    pub roaming: bool,
}

fn default_mtu() -> u16 {
    1280
}

fn default_max_tunnels() -> usize {
    TunnelHandle::CAPACITY
}

impl TunnelConfig {
    fn validate(&self) -> Result<()> {
        if self.default_mtu < MIN_MTU {
            return Err(RuntimeError::config_invalid(
                "tunnel.default_mtu",
                format!("must be at least {MIN_MTU}"),
            ));
        }

        if self.max_tunnels == 0 {
            return Err(RuntimeError::config_invalid(
                "tunnel.max_tunnels",
                "must be greater than 0",
            ));
        }

        if self.max_tunnels > TunnelHandle::CAPACITY {
            return Err(RuntimeError::config_invalid(
                "tunnel.max_tunnels",
                format!("cannot exceed {}", TunnelHandle::CAPACITY),
            ));
        }

        Ok(())
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            default_mtu: default_mtu(),
            max_tunnels: default_max_tunnels(),
            roaming: false,
        }
    }
}

// ============================================
// ReactorConfig
// ============================================

/// Network-change reactor section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactorConfig {
    /// Delay between the first change and endpoint re-resolution.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Whether to open the system route socket.
    #[serde(default = "default_watch_routes")]
    pub watch_routes: bool,
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_watch_routes() -> bool {
    true
}

impl ReactorConfig {
    fn validate(&self) -> Result<()> {
        if self.debounce_ms == 0 {
            return Err(RuntimeError::config_invalid(
                "reactor.debounce_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Debounce interval as a `Duration`.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            watch_routes: default_watch_routes(),
        }
    }
}

// ============================================
// RebindConfig
// ============================================

/// Socket rebind section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebindConfig {
    /// Number of `bind_update` attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_interval_ms() -> u64 {
    500
}

impl RebindConfig {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RuntimeError::config_invalid(
                "rebind.max_attempts",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Retry interval as a `Duration`.
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for RebindConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tunnel.default_mtu, 1280);
        assert!(!config.tunnel.roaming);
        assert_eq!(config.reactor.debounce(), Duration::from_secs(1));
        assert_eq!(config.rebind.max_attempts, 10);
        assert_eq!(config.rebind.retry_interval(), Duration::from_millis(500));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = RuntimeConfig::from_str(
            r#"
            [reactor]
            debounce_ms = 250

            [tunnel]
            max_tunnels = 4
        "#,
        )
        .unwrap();

        assert_eq!(config.reactor.debounce_ms, 250);
        assert!(config.reactor.watch_routes);
        assert_eq!(config.tunnel.max_tunnels, 4);
        assert_eq!(config.tunnel.default_mtu, 1280);
        assert_eq!(config.rebind, RebindConfig::default());
    }

    #[test]
    fn test_validation_errors() {
        let err = RuntimeConfig::from_str("[tunnel]\ndefault_mtu = 100\n").unwrap_err();
        assert!(err.to_string().contains("tunnel.default_mtu"));

        let err = RuntimeConfig::from_str("[reactor]\ndebounce_ms = 0\n").unwrap_err();
        assert!(matches!(err, RuntimeError::ConfigInvalid { .. }));

        let err = RuntimeConfig::from_str("[rebind]\nmax_attempts = 0\n").unwrap_err();
        assert!(err.to_string().contains("rebind.max_attempts"));

        assert!(RuntimeConfig::from_str("[tunnel\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rebind]\nmax_attempts = 3\nretry_interval_ms = 50").unwrap();

        let config = RuntimeConfig::load(file.path()).unwrap();
        assert_eq!(config.rebind.max_attempts, 3);
        assert_eq!(config.rebind.retry_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, RuntimeError::ConfigLoad { .. }));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = RuntimeConfig::default();
        let parsed = config.to_toml().parse::<RuntimeConfig>().unwrap();
        assert_eq!(parsed, config);
    }
}
