//! Host bridge configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rumpel_core::{CoreConfig, SyncConfig, TrackingPreferences};

/// Bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Initial tracking preferences and retention.
    pub tracking: TrackingConfig,
    /// Upload settings.
    pub sync: SyncSettings,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every error found.
    ///
    /// ```
    /// use rumpel_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.tracking.validate());
        errors.extend(self.sync.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Tunables for the tracking core.
    pub fn core_config(&self) -> CoreConfig {
        let mut core = CoreConfig::new(
            SyncConfig::new(self.sync.endpoint.clone()).batch_size(self.sync.batch_size),
        );
        core.retention_days = self.tracking.retention_days;
        core.foreground_budget = Duration::from_secs(self.sync.foreground_budget_secs);
        core.notification_capacity = self.server.broadcast_buffer;
        core
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8787").
    pub bind: String,
    /// Capacity of the notification and host command channels.
    pub broadcast_buffer: usize,
}

/// Default broadcast channel capacity.
pub const DEFAULT_BROADCAST_BUFFER: usize = 100;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            broadcast_buffer: DEFAULT_BROADCAST_BUFFER,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
        } else {
            match self.bind.rsplit_once(':') {
                None => errors.push(ValidationError::new(
                    "server.bind",
                    format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                )),
                Some((_, port)) => match port.parse::<u16>() {
                    Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                    Err(_) => errors.push(ValidationError::new(
                        "server.bind",
                        format!("invalid port '{}': must be a number 1-65535", port),
                    )),
                    Ok(_) => {}
                },
            }
        }

        if self.broadcast_buffer == 0 {
            errors.push(ValidationError::new(
                "server.broadcast_buffer",
                "broadcast buffer must be at least 1",
            ));
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: rumpel_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Minimum retention in days.
pub const MIN_RETENTION_DAYS: u32 = 1;
/// Maximum retention in days (about ten years).
pub const MAX_RETENTION_DAYS: u32 = 3650;

/// Tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Whether tracking starts enabled.
    pub enabled: bool,
    /// Fixes less accurate than this are rejected.
    pub desired_accuracy_meters: f64,
    /// Distance filter handed to the OS for continuous updates.
    pub min_distance_meters: f64,
    /// Samples older than this many days are purged.
    pub retention_days: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        let preferences = TrackingPreferences::default();
        Self {
            enabled: preferences.enabled,
            desired_accuracy_meters: preferences.desired_accuracy_meters,
            min_distance_meters: preferences.min_distance_meters,
            retention_days: rumpel_core::DEFAULT_RETENTION_DAYS,
        }
    }
}

impl TrackingConfig {
    /// The initial preferences for the core.
    pub fn preferences(&self) -> TrackingPreferences {
        TrackingPreferences {
            desired_accuracy_meters: self.desired_accuracy_meters,
            min_distance_meters: self.min_distance_meters,
            enabled: self.enabled,
        }
    }

    /// Validate tracking configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !(self.desired_accuracy_meters > 0.0) {
            errors.push(ValidationError::new(
                "tracking.desired_accuracy_meters",
                format!(
                    "desired accuracy {} must be greater than 0",
                    self.desired_accuracy_meters
                ),
            ));
        }

        if !(self.min_distance_meters >= 0.0) {
            errors.push(ValidationError::new(
                "tracking.min_distance_meters",
                format!(
                    "distance filter {} cannot be negative",
                    self.min_distance_meters
                ),
            ));
        }

        if !(MIN_RETENTION_DAYS..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            errors.push(ValidationError::new(
                "tracking.retention_days",
                format!(
                    "retention {} days is outside {}-{} days",
                    self.retention_days, MIN_RETENTION_DAYS, MAX_RETENTION_DAYS
                ),
            ));
        }

        errors
    }
}

/// Maximum samples per upload.
pub const MAX_BATCH_SIZE: u32 = 1000;
/// Maximum foreground sync budget in seconds.
pub const MAX_BUDGET_SECS: u64 = 600;

/// Upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Endpoint batches are POSTed to. Empty disables uploads.
    pub endpoint: String,
    /// Maximum samples per upload.
    pub batch_size: u32,
    /// Header carrying the auth token.
    pub auth_header: String,
    /// How long a foreground sync may take, in seconds.
    pub foreground_budget_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            batch_size: rumpel_core::DEFAULT_BATCH_SIZE,
            auth_header: rumpel_core::DEFAULT_AUTH_HEADER.to_string(),
            foreground_budget_secs: rumpel_core::DEFAULT_FOREGROUND_BUDGET.as_secs(),
        }
    }
}

impl SyncSettings {
    /// Whether an endpoint is configured.
    pub fn is_enabled(&self) -> bool {
        !self.endpoint.is_empty()
    }

    /// Validate upload configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.is_enabled()
            && !self.endpoint.starts_with("http://")
            && !self.endpoint.starts_with("https://")
        {
            errors.push(ValidationError::new(
                "sync.endpoint",
                format!(
                    "endpoint '{}' must start with http:// or https://",
                    self.endpoint
                ),
            ));
        }

        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            errors.push(ValidationError::new(
                "sync.batch_size",
                format!(
                    "batch size {} is outside 1-{}",
                    self.batch_size, MAX_BATCH_SIZE
                ),
            ));
        }

        if self.auth_header.trim().is_empty() {
            errors.push(ValidationError::new(
                "sync.auth_header",
                "auth header name cannot be empty",
            ));
        }

        if !(1..=MAX_BUDGET_SECS).contains(&self.foreground_budget_secs) {
            errors.push(ValidationError::new(
                "sync.foreground_budget_secs",
                format!(
                    "foreground budget {}s is outside 1-{}s",
                    self.foreground_budget_secs, MAX_BUDGET_SECS
                ),
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `sync.batch_size`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rumpel")
        .join("tracker.toml")
}
