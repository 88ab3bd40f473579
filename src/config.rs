//! Configuration module for Drover
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/drover/drover.toml)
//! - User configuration (~/.drover.toml)
//! - Project configuration (./drover.toml)
//! - Environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Error as DroverError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default settings
    pub defaults: Defaults,

    /// Privilege escalation settings
    pub privilege_escalation: PrivilegeEscalation,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Cloud resource settings
    pub cloud: CloudConfig,
}

/// Default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Initial target list
    pub hosts: Vec<String>,

    /// Run `dispatch`ed work on independent tasks
    pub parallel: bool,

    /// Role that ensured resources are added to
    pub role: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            parallel: false,
            role: "drover".to_string(),
        }
    }
}

/// Privilege escalation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegeEscalation {
    /// Start every run in sudo mode
    pub sudo: bool,

    /// Password handed to the runner for escalated commands
    pub sudo_password: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Severity set, either a level (`info`) or a list (`abort,error,debug`)
    pub log_level: String,

    /// Show the event target in log lines
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            show_target: false,
        }
    }
}

/// Cloud resource settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Default region
    pub region: Option<String>,

    /// Seconds between readiness polls
    pub ready_poll_interval: u64,

    /// Upper bound in seconds for a resource to become ready
    pub ready_timeout: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            region: None,
            ready_poll_interval: 5,
            ready_timeout: 300,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config = config.merge_from_file(&path)?;
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(path) = explicit_path {
            paths.push(path.clone());
            return paths;
        }

        paths.push(PathBuf::from("/etc/drover/drover.toml"));

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".drover.toml"));
            paths.push(home.join(".drover/config.toml"));
        }

        paths.push(PathBuf::from("drover.toml"));

        if let Ok(env_config) = std::env::var("DROVER_CONFIG") {
            paths.insert(0, PathBuf::from(env_config));
        }

        paths
    }

    /// Merge configuration from a file
    fn merge_from_file(&self, path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let file_config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            _ => toml::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        Ok(self.merge(file_config))
    }

    /// Merge another config into this one; non-default values in `other` win
    fn merge(&self, other: Config) -> Config {
        let default_logging = LoggingConfig::default();
        let default_cloud = CloudConfig::default();

        Config {
            defaults: Defaults {
                hosts: if other.defaults.hosts.is_empty() {
                    self.defaults.hosts.clone()
                } else {
                    other.defaults.hosts
                },
                parallel: other.defaults.parallel || self.defaults.parallel,
                role: if other.defaults.role != Defaults::default().role {
                    other.defaults.role
                } else {
                    self.defaults.role.clone()
                },
            },
            privilege_escalation: PrivilegeEscalation {
                sudo: other.privilege_escalation.sudo || self.privilege_escalation.sudo,
                sudo_password: other
                    .privilege_escalation
                    .sudo_password
                    .or_else(|| self.privilege_escalation.sudo_password.clone()),
            },
            logging: LoggingConfig {
                log_level: if other.logging.log_level != default_logging.log_level {
                    other.logging.log_level
                } else {
                    self.logging.log_level.clone()
                },
                show_target: other.logging.show_target || self.logging.show_target,
            },
            cloud: CloudConfig {
                region: other.cloud.region.or_else(|| self.cloud.region.clone()),
                ready_poll_interval: if other.cloud.ready_poll_interval
                    != default_cloud.ready_poll_interval
                {
                    other.cloud.ready_poll_interval
                } else {
                    self.cloud.ready_poll_interval
                },
                ready_timeout: if other.cloud.ready_timeout != default_cloud.ready_timeout {
                    other.cloud.ready_timeout
                } else {
                    self.cloud.ready_timeout
                },
            },
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // DROVER_HOSTS=web1,web2
        if let Ok(hosts) = std::env::var("DROVER_HOSTS") {
            self.defaults.hosts = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect();
        }

        // DROVER_PARALLEL
        if let Ok(parallel) = std::env::var("DROVER_PARALLEL") {
            self.defaults.parallel = matches!(
                parallel.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        // DROVER_LOG_LEVEL
        if let Ok(level) = std::env::var("DROVER_LOG_LEVEL") {
            self.logging.log_level = level;
        }

        // DROVER_SUDO_PASSWORD
        if let Ok(password) = std::env::var("DROVER_SUDO_PASSWORD") {
            self.privilege_escalation.sudo_password = Some(password);
        }

        // DROVER_REGION
        if let Ok(region) = std::env::var("DROVER_REGION") {
            self.cloud.region = Some(region);
        }
    }

    /// Load from a specific file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        Config::default().merge_from_file(&path_buf)
    }
}

/// Cloud API identity.
///
/// Resource clients build this when they are constructed so a missing key
/// fails before any task runs, not on the first API call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

impl Credentials {
    pub const ACCESS_KEY_VAR: &'static str = "AWS_ACCESS_KEY_ID";
    pub const SECRET_KEY_VAR: &'static str = "AWS_SECRET_ACCESS_KEY";

    /// Read credentials from the process environment.
    pub fn from_env(region: Option<String>) -> crate::error::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), region)
    }

    /// Read credentials from the environment for the configured region.
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        Self::from_env(config.cloud.region.clone())
    }

    /// Read credentials through an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F, region: Option<String>) -> crate::error::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| {
                DroverError::Config(format!("Environment variable {} is not set.", key))
            })
        };

        Ok(Self {
            access_key_id: require(Self::ACCESS_KEY_VAR)?,
            secret_access_key: require(Self::SECRET_KEY_VAR)?,
            region,
        })
    }
}
