use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::lifecycle::DEFAULT_DRAIN_TIMEOUT;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Logger configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Enable log output to stdout
    pub enable: bool,

    /// * options: `trace` | `debug` | `info` | `warn` | `error`
    pub level: LogLevel,

    /// * options: `compact` | `pretty` | `json`
    pub format: LogFormat,

    /// Replaces the default filter entirely, e.g. `fininsight=debug,hyper=info`.
    /// `RUST_LOG` still takes precedence.
    pub override_filter: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self { enable: true, level: LogLevel::Info, format: LogFormat::Compact, override_filter: None }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The address on which the server should listen for incoming connections.
    pub binding: String,
    pub port: u16,
    /// Time allowed for in-flight requests once shutdown starts.
    pub drain_timeout_secs: u64,
    /// Per-request deadline; `0` disables it.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binding: "0.0.0.0".to_owned(),
            port: 8080,
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT.as_secs(),
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn full_url(&self) -> String {
        format!("{}:{}", self.binding, self.port)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

/// Bearer token configuration
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret.
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { jwt_secret: "change-me".to_owned(), token_ttl_secs: 3600 }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_owned()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: ["authorization", "content-type", "x-request-id"]
                .map(String::from)
                .to_vec(),
            max_age_secs: Some(600),
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppSettings {
    /// Forces debug-level logging.
    pub debug: bool,
    pub logger: LoggerConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub cors: CorsConfig,
}

impl AppSettings {
    /// Loads settings from a TOML file. A missing file yields the defaults.
    pub fn new(config: &Path) -> Result<Self, SettingsError> {
        if !config.exists() {
            info!(selected_path = ?config, "configuration file not found, using defaults");
            return Ok(Self::default());
        }
        info!(selected_path = ?config, "loading configuration from");
        let content = std::fs::read_to_string(config)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str::<Self>(content)?)
    }

    /// The effective log level once `debug` is taken into account.
    pub fn log_level(&self) -> LogLevel {
        if self.debug { LogLevel::Debug } else { self.logger.level }
    }
}

impl fmt::Display for AppSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut redacted = self.clone();
        redacted.auth.jwt_secret = "<redacted>".to_owned();
        let content = toml::to_string(&redacted).unwrap_or_default();
        write!(f, "{content}")
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let settings = AppSettings::from_toml(
            r#"
            debug = true

            [server]
            port = 9000
            drain_timeout_secs = 5

            [logger]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.binding, "0.0.0.0");
        assert_eq!(settings.server.drain_timeout(), Duration::from_secs(5));
        assert_eq!(settings.logger.format, LogFormat::Json);
        assert_eq!(settings.log_level(), LogLevel::Debug);
        assert_eq!(settings.cors.allowed_origins, vec!["*"]);
    }

    #[test]
    fn zero_request_timeout_disables_deadline() {
        let settings = AppSettings::from_toml("[server]\nrequest_timeout_secs = 0\n").unwrap();
        assert_eq!(settings.server.request_timeout(), None);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(matches!(
            AppSettings::from_toml("[server]\nport = \"eighty\""),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn display_redacts_secret() {
        let mut settings = AppSettings::default();
        settings.auth.jwt_secret = "topsecret".into();
        assert!(!settings.to_string().contains("topsecret"));
    }
}
