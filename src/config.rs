//! Service configuration.
//!
//! Loaded from a YAML file (`config.yml` by default) whose keys follow the
//! upper-case convention of the surrounding Laravel deployment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use figment::providers::{Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::api::stream::SessionConfig;
use crate::broadcast::BufferPolicy;
use crate::types::EntityKind;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist
    #[error("configuration file not found: {0}")]
    Missing(PathBuf),

    /// The file could not be parsed or a value had the wrong type
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] Box<figment::Error>),

    /// A value parsed but is out of range
    #[error("invalid configuration value for {key}: {message}")]
    Invalid {
        key: &'static str,
        message: String,
    },

    /// Only SQLite is supported as a storage driver
    #[error("unsupported DB_CONNECTION: {0}")]
    UnsupportedDriver(String),
}

/// Configuration for the live feed service
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Verbose logging
    #[serde(rename = "DEBUG", default)]
    pub debug: bool,
    /// Storage driver (only `sqlite`)
    #[serde(rename = "DB_CONNECTION", default = "default_db_connection")]
    pub db_connection: String,
    /// Absolute path of the SQLite database
    #[serde(rename = "DB_DATABASE", default)]
    pub db_database: Option<PathBuf>,
    /// Maximum pooled database connections
    #[serde(rename = "DB_POOL_SIZE", default = "default_pool_size")]
    pub db_pool_size: u32,
    /// Origin allowed by CORS
    #[serde(rename = "APP_URL", default = "default_app_url")]
    pub app_url: String,
    /// IANA zone the application stores timestamps in; unset means UTC
    #[serde(rename = "APP_TIMEZONE", default)]
    pub app_timezone: Option<String>,
    /// Listening port
    #[serde(rename = "APP_PORT", default = "default_app_port")]
    pub app_port: u16,
    /// Product poll interval in seconds (`0` = default)
    #[serde(rename = "PRODUCT_POLL_INTERVAL", default)]
    pub product_poll_interval: u64,
    /// Order poll interval in seconds (`0` = default)
    #[serde(rename = "ORDER_POLL_INTERVAL", default)]
    pub order_poll_interval: u64,
    /// Discord webhook for delivery alerts
    #[serde(rename = "DISCORD_WEBHOOK_URL", default)]
    pub discord_webhook_url: Option<String>,
    /// Starting capacity of subscriber channels
    #[serde(rename = "INITIAL_BUFFER_SIZE", default = "default_initial_buffer")]
    pub initial_buffer_size: usize,
    /// Upper bound for subscriber channel capacity
    #[serde(rename = "MAX_BUFFER_SIZE", default = "default_max_buffer")]
    pub max_buffer_size: usize,
    /// Hard cap on a stream's lifetime in seconds
    #[serde(rename = "STREAM_LIFETIME_SECS", default = "default_stream_lifetime")]
    pub stream_lifetime_secs: u64,
    /// Length of the disconnect warning countdown in seconds
    #[serde(rename = "STREAM_WARNING_SECS", default = "default_stream_warning")]
    pub stream_warning_secs: u64,
    /// How long an access token stays valid after creation
    #[serde(rename = "TOKEN_TTL_SECS", default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    /// Append-only log file; empty disables file logging
    #[serde(rename = "LOG_FILE", default = "default_log_file")]
    pub log_file: Option<PathBuf>,
}

fn default_db_connection() -> String {
    "sqlite".into()
}

fn default_pool_size() -> u32 {
    10
}

fn default_app_url() -> String {
    "http://localhost".into()
}

fn default_app_port() -> u16 {
    8000
}

fn default_initial_buffer() -> usize {
    100
}

fn default_max_buffer() -> usize {
    500
}

fn default_stream_lifetime() -> u64 {
    300
}

fn default_stream_warning() -> u64 {
    60
}

fn default_token_ttl() -> u64 {
    300
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("app.log"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            db_connection: default_db_connection(),
            db_database: None,
            db_pool_size: default_pool_size(),
            app_url: default_app_url(),
            app_timezone: None,
            app_port: default_app_port(),
            product_poll_interval: 0,
            order_poll_interval: 0,
            discord_webhook_url: None,
            initial_buffer_size: default_initial_buffer(),
            max_buffer_size: default_max_buffer(),
            stream_lifetime_secs: default_stream_lifetime(),
            stream_warning_secs: default_stream_warning(),
            token_ttl_secs: default_token_ttl(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        Self::extract(Figment::from(Yaml::file(path)))
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Yaml::string(yaml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract().map_err(Box::new)?;
        config.validate()
    }

    /// Check value ranges and fill in derived defaults
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if !self.db_connection.eq_ignore_ascii_case("sqlite") {
            return Err(ConfigError::UnsupportedDriver(self.db_connection));
        }
        if self.initial_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                key: "INITIAL_BUFFER_SIZE",
                message: "must be at least 1".into(),
            });
        }
        if self.max_buffer_size < self.initial_buffer_size {
            return Err(ConfigError::Invalid {
                key: "MAX_BUFFER_SIZE",
                message: format!(
                    "{} is smaller than INITIAL_BUFFER_SIZE {}",
                    self.max_buffer_size, self.initial_buffer_size
                ),
            });
        }
        if self.stream_lifetime_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "STREAM_LIFETIME_SECS",
                message: "must be at least 1".into(),
            });
        }
        if self.stream_warning_secs > self.stream_lifetime_secs {
            return Err(ConfigError::Invalid {
                key: "STREAM_WARNING_SECS",
                message: "must not exceed STREAM_LIFETIME_SECS".into(),
            });
        }
        if let Some(path) = &self.db_database {
            if !path.is_absolute() {
                return Err(ConfigError::Invalid {
                    key: "DB_DATABASE",
                    message: format!("SQLite database path must be absolute: {}", path.display()),
                });
            }
        }
        if self.log_file.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            self.log_file = None;
        }
        if self
            .app_timezone
            .as_ref()
            .is_some_and(|tz| tz.trim().is_empty())
        {
            self.app_timezone = None;
        }
        if self
            .discord_webhook_url
            .as_ref()
            .is_some_and(|url| url.trim().is_empty())
        {
            self.discord_webhook_url = None;
        }
        Ok(self)
    }

    /// Database path, falling back to the Laravel default under `$HOME`
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.db_database {
            return Ok(path.clone());
        }
        let home = std::env::var_os("HOME").ok_or(ConfigError::Invalid {
            key: "DB_DATABASE",
            message: "not set and HOME is unavailable".into(),
        })?;
        Ok(PathBuf::from(home).join("database").join("database.sqlite"))
    }

    /// Poll interval for a kind; `0` selects the kind's default
    pub fn poll_interval(&self, kind: EntityKind) -> Duration {
        let secs = match kind {
            EntityKind::Products => self.product_poll_interval,
            EntityKind::Orders => self.order_poll_interval,
        };
        if secs == 0 {
            kind.default_poll_interval()
        } else {
            Duration::from_secs(secs)
        }
    }

    /// Adaptive buffer bounds for the broadcaster
    pub fn buffer_policy(&self) -> BufferPolicy {
        BufferPolicy {
            initial: self.initial_buffer_size,
            max: self.max_buffer_size,
        }
    }

    /// Streaming session timings
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            lifetime: Duration::from_secs(self.stream_lifetime_secs),
            warning_window: Duration::from_secs(self.stream_warning_secs),
            ..SessionConfig::default()
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Zone of stored timestamps. Unset or unknown names fall back to UTC
    /// with a warning, so call this after logging is installed.
    pub fn timezone(&self) -> Tz {
        let Some(name) = self.app_timezone.as_deref() else {
            warn!("APP_TIMEZONE is not set, using UTC");
            return Tz::UTC;
        };
        match name.trim().parse::<Tz>() {
            Ok(tz) => tz,
            Err(e) => {
                warn!(timezone = name, error = %e, "invalid APP_TIMEZONE, using UTC");
                Tz::UTC
            }
        }
    }
}
