//! Configuration loading and types for BleepGate.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! gateway: networking, request signing, the browser console, CORS,
//! logging and metrics.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Credentials and signature verification settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Browser console settings.
    #[serde(default)]
    pub console: ConsoleConfig,

    /// Cross-origin settings for browser clients.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// AWS region to present (e.g. `us-east-1`).
    #[serde(default = "default_region")]
    pub region: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            region: default_region(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Access key (also accepts `access_key_id`).
    #[serde(alias = "access_key_id", default = "default_access_key")]
    pub access_key: String,

    /// Secret access key (also accepts `secret_access_key`).
    #[serde(alias = "secret_access_key", default = "default_secret_key")]
    pub secret_key: String,

    /// Allowed difference between the request timestamp and server time.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_key: default_access_key(),
            secret_key: default_secret_key(),
            clock_skew_seconds: default_clock_skew(),
        }
    }
}

/// Browser console settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    /// Serve the console at all. When disabled the prefix stays reserved.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Reserved path prefix; a single literal segment such as `/minio`.
    #[serde(default = "default_console_prefix")]
    pub prefix: String,

    /// Directory holding the console bundle. Built-in assets when unset.
    #[serde(default)]
    pub assets_dir: Option<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_console_prefix(),
            assets_dir: None,
        }
    }
}

/// CORS settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed to make cross-origin requests. `*` allows any.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Value of `Access-Control-Max-Age` on preflight responses.
    #[serde(default = "default_cors_max_age")]
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            max_age_seconds: default_cors_max_age(),
        }
    }
}

impl CorsConfig {
    /// Whether `origin` may access the gateway from a browser.
    pub fn allows(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Record request metrics.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Address of a dedicated Prometheus scrape listener, if any.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            metrics_addr: None,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_access_key() -> String {
    "bleepgate".to_string()
}

fn default_secret_key() -> String {
    "bleepgate-secret".to_string()
}

fn default_clock_skew() -> u64 {
    900 // 15 minutes
}

fn default_console_prefix() -> String {
    "/minio".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_cors_max_age() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    validate(&config)?;
    Ok(config)
}

/// Reject configurations the gateway cannot serve.
pub fn validate(config: &Config) -> anyhow::Result<()> {
    let prefix = &config.console.prefix;
    if !prefix.starts_with('/') || prefix.len() < 2 || prefix[1..].contains('/') {
        anyhow::bail!("console.prefix must be a single path segment such as /minio, got {prefix:?}");
    }
    if config.auth.clock_skew_seconds == 0 {
        anyhow::bail!("auth.clock_skew_seconds must be greater than zero");
    }
    Ok(())
}
