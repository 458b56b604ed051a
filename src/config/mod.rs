//! Application configuration loading, validation, and management.
//!
//! The top-level [`Config`] aggregates one section per subsystem. It is
//! loaded once, before the logger exists, and stays immutable afterwards.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::{
    executor::{ExecutorConfig, SourceConfig},
    logger::LoggerConfig,
    sinks::{CacheConfig, ConsoleSinkConfig, HttpConfig},
};

pub mod executor;
pub mod logger;
pub mod sinks;

/// Environment variable pointing at the configuration file.
pub const CONFIG_ENV: &str = "POLLBEE_CONFIG";

/// Location used when the environment variable is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pollbee/config.toml";

#[doc(hidden)]
pub fn timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

/// Timestamped messages printed before the tracing subscriber is initialized.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

/// Errors that can occur during configuration loading, parsing or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(feature = "pollbee-mqtt")]
pub type MqttConfig = pollbee_mqtt::Config;

/// Top-level application configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub executor: ExecutorConfig,

    #[validate(nested)]
    pub source: SourceConfig,

    #[validate(nested)]
    pub console: ConsoleSinkConfig,

    #[validate(nested)]
    pub cache: CacheConfig,

    #[validate(nested)]
    pub http: HttpConfig,

    #[cfg(feature = "pollbee-mqtt")]
    #[validate(nested)]
    pub mqtt: MqttConfig,
}

impl Config {
    /// Locates and loads the configuration file, falling back to built-in
    /// defaults when there is none.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if an existing file cannot be read, parsed, or
    /// validated, or if `POLLBEE_CONFIG` names a missing file.
    pub fn new() -> Result<Self, ConfigError> {
        match Self::get_config_path()? {
            Some(path) => Self::load(&path),
            None => {
                print_warn!(
                    "No configuration file found at {}, using built-in defaults",
                    DEFAULT_CONFIG_PATH
                );
                let mut config = Config::default();
                config.apply_source_defaults();
                config
                    .validate()
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
                Ok(config)
            }
        }
    }

    /// Priority: `POLLBEE_CONFIG`, then `/etc/pollbee/config.toml`.
    fn get_config_path() -> Result<Option<PathBuf>, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Ok(Some(path));
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(Some(fallback.to_path_buf()));
        }

        Ok(None)
    }

    /// Loads and validates configuration from the specified path.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        let config = Self::parse(&config_str)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Fills the chart marks from the source kind when `[http] y_axis` is empty.
    fn apply_source_defaults(&mut self) {
        if self.http.y_axis.is_empty() {
            self.http.y_axis = self
                .source
                .kind
                .default_marks()
                .iter()
                .map(|mark| mark.to_string())
                .collect();
        }
    }

    /// Parses and validates a TOML document.
    pub fn parse(content: &str) -> Result<Config, ConfigError> {
        let mut config: Config =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.apply_source_defaults();

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(config)
    }
}
