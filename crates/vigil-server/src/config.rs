//! Configuration loading and validation for the vigil daemon

use crate::scheduler::SchedulePolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};
use vigil::transport::SshOptions;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub feed: FeedSettings,

    #[serde(default)]
    pub icmp: IcmpSettings,

    #[serde(default)]
    pub ssh: SshSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.server.validate()?;
        self.scheduler.validate()?;
        self.feed.validate()?;
        self.ssh.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// API server settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerSettings {
    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,
}

/// Scheduler loop settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SchedulerSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_tick")]
    pub tick: Duration,

    #[validate(range(min = 1, max = 1000))]
    pub stale_age_factor: u32,

    #[validate(range(min = 1, max = 1000))]
    pub stale_overdue_factor: u32,
}

/// Change feed settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FeedSettings {
    #[validate(range(min = 1, max = 100000))]
    pub subscriber_buffer: usize,
}

/// ICMP engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IcmpSettings {
    /// Opening the raw socket needs CAP_NET_RAW; disabling drops the icmp4 agent
    pub enabled: bool,
}

/// SSH client settings for the ssh transport and ssh-command agent
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SshSettings {
    pub binary: PathBuf,

    pub identity_file: Option<PathBuf>,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_connect_timeout")]
    pub connect_timeout: Duration,
}

/// Monitor persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// JSON snapshot file; monitors are kept in memory only when unset
    pub path: Option<PathBuf>,
}

/// Prometheus metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,

    #[validate(custom = "validate_log_format")]
    pub format: String,
}

// Default implementations

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9901".to_string(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let policy = SchedulePolicy::default();
        Self {
            tick: policy.tick,
            stale_age_factor: policy.stale_age_factor,
            stale_overdue_factor: policy.stale_overdue_factor,
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            subscriber_buffer: crate::feed::DEFAULT_BUFFER,
        }
    }
}

impl Default for IcmpSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        let options = SshOptions::default();
        Self {
            binary: options.binary,
            identity_file: options.identity_file,
            connect_timeout: options.connect_timeout,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// Custom validators

fn validate_listen_addr(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("listen_addr_invalid"))
}

fn validate_tick(tick: &Duration) -> Result<(), ValidationError> {
    let millis = tick.as_millis();
    if !(10..=60_000).contains(&millis) {
        return Err(ValidationError::new("tick_out_of_range"));
    }
    Ok(())
}

fn validate_connect_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    if timeout.as_secs() < 1 || timeout.as_secs() > 300 {
        return Err(ValidationError::new("connect_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_log_format(format: &str) -> Result<(), ValidationError> {
    match format {
        "text" | "json" => Ok(()),
        _ => Err(ValidationError::new("log_format_unknown")),
    }
}

// Configuration loading implementation

impl Config {
    /// Load configuration from `path`, or from the default search paths
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/vigil/vigil.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./vigil.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/vigil/vigil.yaml"))
    }

    pub fn schedule_policy(&self) -> SchedulePolicy {
        SchedulePolicy {
            tick: self.scheduler.tick,
            stale_age_factor: self.scheduler.stale_age_factor,
            stale_overdue_factor: self.scheduler.stale_overdue_factor,
        }
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            binary: self.ssh.binary.clone(),
            identity_file: self.ssh.identity_file.clone(),
            connect_timeout: self.ssh.connect_timeout,
        }
    }
}
