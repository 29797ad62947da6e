//! Configuration file parsing for remountd
//!
//! Parses `remountd.toml` configuration files using serde

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load configuration from a file
pub fn load(path: &Path) -> Result<RemountdConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: RemountdConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Deserialize)]
pub struct RemountdConfig {
    /// Global configuration settings
    #[serde(default)]
    pub config: GlobalConfig,

    /// Health monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Mount definitions
    #[serde(default)]
    pub mounts: Vec<MountDef>,
}

impl RemountdConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.mounts.is_empty() {
            return Err(Error::ConfigValidation("No mounts defined".into()));
        }

        let mut names = HashSet::new();
        for mount in &self.mounts {
            if mount.name.trim().is_empty() {
                return Err(Error::ConfigValidation("Mount name cannot be empty".into()));
            }
            if !names.insert(&mount.name) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate mount name: {}",
                    mount.name
                )));
            }
            if mount.mount_command.trim().is_empty() {
                return Err(Error::ConfigValidation(format!(
                    "Mount '{}' has no mount_command",
                    mount.name
                )));
            }
            if !mount.local_path.is_absolute() {
                return Err(Error::ConfigValidation(format!(
                    "Mount '{}' local_path must be absolute: {}",
                    mount.name,
                    mount.local_path.display()
                )));
            }
            if !is_host_port(&mount.remote) {
                return Err(Error::ConfigValidation(format!(
                    "Mount '{}' remote must be host:port, got '{}'",
                    mount.name, mount.remote
                )));
            }
        }

        if self.config.retry_attempts == 0 {
            return Err(Error::ConfigValidation(
                "retry_attempts must be at least 1".into(),
            ));
        }

        if self.monitor.interval == 0 || self.monitor.timeout == 0 {
            return Err(Error::ConfigValidation(
                "monitor interval and timeout must be non-zero".into(),
            ));
        }

        Ok(())
    }

    /// Find a mount by name
    pub fn find_mount(&self, name: &str) -> Result<&MountDef> {
        self.mounts
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::MountNotFound(name.to_string()))
    }
}

/// Syntax check for `host:port`, without resolving the host
fn is_host_port(remote: &str) -> bool {
    let Some((host, port)) = remote.rsplit_once(':') else {
        return false;
    };
    let host = match host.strip_prefix('[') {
        Some(inner) => match inner.strip_suffix(']') {
            Some(ip) => ip,
            None => return false,
        },
        None if host.contains(':') => return false,
        None => host,
    };
    !host.is_empty() && !host.contains(char::is_whitespace) && port.parse::<u16>().is_ok()
}

/// Global configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Attempts made while the remote refuses connections during a remount
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Pause between those attempts (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Timeout for each mount or unmount command (seconds)
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
}

impl GlobalConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn command_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_command_timeout() -> u64 {
    120
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            command_timeout: default_command_timeout(),
        }
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between samples
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Seconds allowed for each connection probe
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl MonitorConfig {
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn default_interval() -> u64 {
    10
}

fn default_timeout() -> u64 {
    5
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            timeout: default_timeout(),
        }
    }
}

/// A managed mount
#[derive(Debug, Clone, Deserialize)]
pub struct MountDef {
    /// Unique mount name
    pub name: String,

    /// Local mount point
    pub local_path: PathBuf,

    /// Remote endpoint probed for health (`host:port`)
    pub remote: String,

    /// Command that mounts the remote on `local_path`
    pub mount_command: String,

    /// Command that tears down a stale mount before remounting
    #[serde(default)]
    pub unmount_command: Option<String>,
}
