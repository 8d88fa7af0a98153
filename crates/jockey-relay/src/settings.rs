//! Configuration file, defaults and environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::api::StreamSettings;
use crate::jockey::{JockeyClientConfig, RetryPolicy, StreamMode};

pub const APP_NAME: &str = "jockey-relay";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub jockey: JockeyConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed to call the API from a browser.
    pub cors_origins: Vec<String>,
    /// Built frontend served for any non-API path.
    pub static_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
                "http://localhost:9000".to_string(),
                "http://127.0.0.1:9000".to_string(),
            ],
            static_dir: None,
        }
    }
}

/// Jockey server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JockeyConfig {
    /// Base URL of the Jockey API (e.g. "http://localhost:8123").
    pub api_url: Option<String>,
    /// Base URL serving rendered videos.
    pub static_url: Option<String>,
    /// Index used when a request does not name one.
    pub default_index_id: Option<String>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub default_stream_mode: StreamMode,
}

impl Default for JockeyConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            static_url: None,
            default_index_id: None,
            request_timeout_secs: 360,
            connect_timeout_secs: 10,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            default_stream_mode: StreamMode::Messages,
        }
    }
}

impl JockeyConfig {
    /// Client settings; fails when no API URL is configured.
    pub fn client_config(&self) -> Result<JockeyClientConfig> {
        let api_url = self
            .api_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "jockey.api_url is not set (set it in the config file or {}__JOCKEY__API_URL)",
                    env_prefix()
                )
            })?;

        Ok(JockeyClientConfig {
            api_url: api_url.to_string(),
            static_url: self.static_url.clone().filter(|url| !url.is_empty()),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.retry_attempts.max(1),
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
            },
        })
    }
}

/// Delivery endpoint timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Idle seconds before an SSE ping.
    pub sse_idle_timeout_secs: u64,
    /// Idle seconds before a WebSocket ping.
    pub ws_idle_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sse_idle_timeout_secs: 1,
            ws_idle_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            sse_idle_timeout: Duration::from_secs(self.stream.sse_idle_timeout_secs.max(1)),
            ws_idle_timeout: Duration::from_secs(self.stream.ws_idle_timeout_secs.max(1)),
            default_stream_mode: self.jockey.default_stream_mode,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load the config: defaults, then the TOML file if present, then env vars.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 9000_i64)?
        .set_default("logging.level", "info")?
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()
        .with_context(|| format!("loading config from {}", path.display()))?;

    let mut config: AppConfig = built.try_deserialize()?;

    if let Some(ref dir) = config.server.static_dir {
        config.server.static_dir = Some(expand_str_path(dir)?.display().to_string());
    }

    Ok(config)
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push_str("# Set jockey.api_url before running `");
    buffer.push_str(APP_NAME);
    buffer.push_str(" serve`.\n");
    buffer.push('\n');
    buffer
}

/// Resolve the config file path, honouring an explicit override.
pub fn config_file_path(override_path: Option<PathBuf>) -> Result<PathBuf> {
    match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                Ok(expanded.join("config.toml"))
            } else {
                Ok(expanded)
            }
        }
        None => Ok(default_config_dir()?.join("config.toml")),
    }
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

pub fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

/// Environment variable prefix, e.g. `JOCKEY_RELAY`.
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
