//! Configuration management for TailOverlay.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/tailoverlay/config.toml` |
//! | macOS | `~/Library/Application Support/com.tailoverlay.TailOverlay/config.toml` |
//! | Windows | `%APPDATA%\tailoverlay\TailOverlay\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use tailoverlay_core::config::Config;
//!
//! let mut config = Config::load()?;
//! config.apply_env();
//! let options = config.session_options()?;
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::SystemClock;
use crate::error::{Error, Result};
use crate::join::JoinTimeouts;
use crate::session::{AccessMode, AccessPolicy, SessionOptions};
use crate::web::HostOptions;

/// Main configuration struct for TailOverlay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Network settings
    pub network: NetworkConfig,
    /// Session timing and limits
    pub session: SessionConfig,
    /// Who may join
    pub access: AccessConfig,
    /// Where uploads are kept
    pub storage: StorageConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Device name to present as the host, instead of the resolved one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the host service listens on
    pub bind_address: IpAddr,
    /// Port of the host service
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: crate::DEFAULT_PORT,
        }
    }
}

/// Session configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a join request may wait for the host
    #[serde(with = "humantime_serde")]
    pub pending_ttl: Duration,
    /// How long an approve/deny outcome stays available to the requester
    #[serde(with = "humantime_serde")]
    pub completed_ttl: Duration,
    /// Interval of the background expiry sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Events buffered per live subscriber
    pub subscriber_buffer: usize,
    /// Maximum upload size in bytes
    pub max_upload_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::from_secs(crate::DEFAULT_PENDING_TTL_SECS),
            completed_ttl: Duration::from_secs(crate::DEFAULT_COMPLETED_TTL_SECS),
            sweep_interval: Duration::from_secs(crate::DEFAULT_SWEEP_INTERVAL_SECS),
            subscriber_buffer: crate::DEFAULT_SUBSCRIBER_BUFFER,
            max_upload_size: crate::DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

/// Access control options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Approval workflow or allow-list only
    pub mode: AccessMode,
    /// Devices admitted without asking the host
    pub allowed_devices: Vec<String>,
}

/// Storage options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for uploaded content (default: `./tailoverlay-workspace`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// The configured directory, or the default below the working directory.
    #[must_use]
    pub fn resolved_dir(&self) -> PathBuf {
        self.workspace_dir.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("tailoverlay-workspace")
        })
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or holds invalid values.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        std::fs::write(&path, self.to_toml()?)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tailoverlay", "TailOverlay")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Apply overrides from the environment.
    ///
    /// A non-empty `TAILOVERLAY_ALLOWED_DEVICES` replaces the configured
    /// allow-list.
    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var(crate::ALLOWED_DEVICES_ENV) {
            self.apply_allowed_devices(&raw);
        }
    }

    /// Replace the allow-list with a comma-separated device list.
    ///
    /// Blank input leaves the configured list untouched.
    pub fn apply_allowed_devices(&mut self, raw: &str) {
        let devices = parse_device_list(raw);
        if !devices.is_empty() {
            self.access.allowed_devices = devices;
        }
    }

    /// Check values that would make a session unusable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, reason: &str| Error::InvalidConfig {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if self.session.pending_ttl.is_zero() {
            return Err(invalid("session.pending_ttl", "must be greater than zero"));
        }
        if self.session.completed_ttl.is_zero() {
            return Err(invalid("session.completed_ttl", "must be greater than zero"));
        }
        if self.session.sweep_interval.is_zero() {
            return Err(invalid("session.sweep_interval", "must be greater than zero"));
        }
        if self.session.subscriber_buffer == 0 {
            return Err(invalid("session.subscriber_buffer", "must be at least 1"));
        }
        if self.session.max_upload_size == 0 {
            return Err(invalid("session.max_upload_size", "must be at least 1 byte"));
        }
        if self.access.mode == AccessMode::AllowList && self.access.allowed_devices.is_empty() {
            tracing::warn!("Access mode is allow_list but no devices are allowed");
        }
        Ok(())
    }

    /// Build the session options this configuration describes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a duration is out of range.
    pub fn session_options(&self) -> Result<SessionOptions> {
        let to_chrono = |key: &str, d: Duration| {
            chrono::Duration::from_std(d).map_err(|e| Error::InvalidConfig {
                key: key.to_string(),
                reason: e.to_string(),
            })
        };

        Ok(SessionOptions {
            timeouts: JoinTimeouts {
                pending_ttl: to_chrono("session.pending_ttl", self.session.pending_ttl)?,
                completed_ttl: to_chrono("session.completed_ttl", self.session.completed_ttl)?,
            },
            access: AccessPolicy {
                mode: self.access.mode,
                allowed_devices: self.access.allowed_devices.clone(),
            },
            subscriber_buffer: self.session.subscriber_buffer,
            storage_dir: self.storage.resolved_dir(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Build the host runtime options this configuration describes.
    #[must_use]
    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            bind: SocketAddr::new(self.network.bind_address, self.network.port),
            sweep_interval: self.session.sweep_interval,
            max_upload_size: self.session.max_upload_size,
        }
    }
}

/// Split a comma-separated device list, dropping blank entries.
#[must_use]
pub fn parse_device_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = duration.as_secs();
        if secs != 0 && secs % 60 == 0 {
            serializer.serialize_str(&format!("{}m", secs / 60))
        } else {
            serializer.serialize_str(&format!("{secs}s"))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();
        let (digits, unit) = match s.char_indices().last() {
            Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], c),
            _ => (s, 's'),
        };
        let value: u64 = digits.trim().parse().map_err(serde::de::Error::custom)?;
        let multiplier = match unit {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            other => {
                return Err(serde::de::Error::custom(format!(
                    "invalid duration unit '{other}', expected s, m or h"
                )))
            }
        };
        value
            .checked_mul(multiplier)
            .map(Duration::from_secs)
            .ok_or_else(|| serde::de::Error::custom(format!("duration '{s}' is too large")))
    }
}
