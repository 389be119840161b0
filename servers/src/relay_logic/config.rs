//! # Relay Configuration
//!
//! Three layers, later ones winning field by field:
//! 1. built-in defaults,
//! 2. the JSON config file (`server_backends.conf` unless `--config-path`),
//! 3. environment variables and command line arguments.
//!
//! [`Config`] is the raw, all-optional layer; [`Settings`] is the resolved
//! result the binary runs with.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use lib_common::discovery::{
    parse_address_list, BackendSource, EnvBackendSource, FileBackendSource, StaticBackendSource,
};
use lib_common::web::WebSettings;

const DEFAULT_CONFIG_FILE: &str = "server_backends.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Backend discovery relay with STOMP push notifications", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "RELAY_HOST", help = "Address to bind the HTTP server to.")]
    pub host: Option<String>,

    #[clap(long, env = "RELAY_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_LEVEL", help = "Logging level or filter (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(
        long,
        env = "RELAY_LOG_JSON",
        num_args = 0..=1,
        default_missing_value = "true",
        help = "Emit logs as JSON lines."
    )]
    pub log_json: Option<bool>,

    #[clap(long, help = "Environment variable holding the comma-separated backend list.")]
    pub backends_env: Option<String>,

    #[clap(long, help = "Backend list used when that environment variable is unset.")]
    pub default_backends: Option<String>,

    #[clap(long, help = "Fixed comma-separated backend list; overrides the environment variable.")]
    pub backends: Option<String>,

    #[clap(long, env = "RELAY_BACKENDS_FILE", help = "File with the backend list, re-read every cycle.")]
    pub backends_file: Option<PathBuf>,

    #[clap(long, help = "Seconds between discovery cycles.")]
    pub discovery_interval_secs: Option<u64>,

    #[clap(long, help = "Timeout in seconds for one backend info request.")]
    pub resolve_timeout_secs: Option<u64>,

    #[clap(long, help = "Timeout in seconds for proxied data requests.")]
    pub proxy_timeout_secs: Option<u64>,

    #[clap(long, env = "RELAY_STATIC_DIR", help = "Directory with the UI's static files.")]
    pub static_dir: Option<PathBuf>,

    #[clap(long, help = "Mount point of the SockJS endpoint.")]
    pub sockjs_prefix: Option<String>,

    #[clap(long, help = "Seconds between SockJS heartbeat frames.")]
    pub heartbeat_secs: Option<u64>,

    #[clap(long, help = "Outbound messages queued per session before it is dropped.")]
    pub outbound_queue: Option<usize>,

    #[clap(long, help = "Largest accepted inbound STOMP frame in bytes.")]
    pub max_frame_bytes: Option<usize>,
}

impl Config {
    /// Merges two layers; `Some` values of `other` win.
    fn merge(self, other: Config) -> Config {
        Config {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_json: other.log_json.or(self.log_json),
            backends_env: other.backends_env.or(self.backends_env),
            default_backends: other.default_backends.or(self.default_backends),
            backends: other.backends.or(self.backends),
            backends_file: other.backends_file.or(self.backends_file),
            discovery_interval_secs: other.discovery_interval_secs.or(self.discovery_interval_secs),
            resolve_timeout_secs: other.resolve_timeout_secs.or(self.resolve_timeout_secs),
            proxy_timeout_secs: other.proxy_timeout_secs.or(self.proxy_timeout_secs),
            static_dir: other.static_dir.or(self.static_dir),
            sockjs_prefix: other.sockjs_prefix.or(self.sockjs_prefix),
            heartbeat_secs: other.heartbeat_secs.or(self.heartbeat_secs),
            outbound_queue: other.outbound_queue.or(self.outbound_queue),
            max_frame_bytes: other.max_frame_bytes.or(self.max_frame_bytes),
        }
    }

    fn defaults() -> Config {
        Config {
            host: Some("0.0.0.0".to_string()),
            port: Some(8080),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            log_json: Some(false),
            backends_env: Some("BACKEND_SERVICES".to_string()),
            default_backends: Some("notebook:8080".to_string()),
            discovery_interval_secs: Some(15),
            resolve_timeout_secs: Some(10),
            proxy_timeout_secs: Some(60),
            static_dir: Some(PathBuf::from("static")),
            sockjs_prefix: Some("/socks-backends".to_string()),
            heartbeat_secs: Some(25),
            outbound_queue: Some(256),
            max_frame_bytes: Some(64 * 1024),
            ..Default::default()
        }
    }

    /// Turns the merged layers into concrete settings.
    pub fn settings(&self) -> Result<Settings> {
        let defaults = Config::defaults();
        let merged = defaults.merge(self.clone());

        let discovery_interval = Duration::from_secs(merged.discovery_interval_secs.unwrap_or(15).max(1));
        let resolve_timeout =
            Duration::from_secs(merged.resolve_timeout_secs.unwrap_or(10).max(1)).min(discovery_interval);

        let source = if let Some(list) = merged.backends.as_deref() {
            SourceSetting::Static(parse_address_list(list))
        } else if let Some(path) = merged.backends_file.clone() {
            SourceSetting::File(path)
        } else {
            SourceSetting::Env {
                var: merged.backends_env.clone().unwrap_or_default(),
                default: merged.default_backends.clone().unwrap_or_default(),
            }
        };

        if let SourceSetting::Env { var, .. } = &source {
            anyhow::ensure!(!var.is_empty(), "backends environment variable name must not be empty");
        }

        Ok(Settings {
            host: merged.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: merged.port.unwrap_or(8080),
            log_dir: merged.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: merged.log_level.unwrap_or_else(|| "info".to_string()),
            log_json: merged.log_json.unwrap_or(false),
            source,
            discovery_interval,
            resolve_timeout,
            proxy_timeout: Duration::from_secs(merged.proxy_timeout_secs.unwrap_or(60).max(1)),
            outbound_queue: merged.outbound_queue.unwrap_or(256).max(1),
            max_frame_bytes: merged.max_frame_bytes.unwrap_or(64 * 1024).max(64),
            web: WebSettings {
                sockjs_prefix: merged.sockjs_prefix.unwrap_or_else(|| "/socks-backends".to_string()),
                heartbeat: Duration::from_secs(merged.heartbeat_secs.unwrap_or(25).max(1)),
                static_dir: merged.static_dir.unwrap_or_else(|| PathBuf::from("static")),
            },
        })
    }
}

/// Where the backend address list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSetting {
    /// Fixed list from the config file or `--backends`.
    Static(Vec<String>),
    /// File re-read every cycle.
    File(PathBuf),
    /// Environment variable re-read every cycle, with a fallback list.
    Env { var: String, default: String },
}

/// # Settings
///
/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub log_json: bool,
    pub source: SourceSetting,
    pub discovery_interval: Duration,
    /// Never longer than `discovery_interval`.
    pub resolve_timeout: Duration,
    pub proxy_timeout: Duration,
    pub outbound_queue: usize,
    pub max_frame_bytes: usize,
    pub web: WebSettings,
}

impl Settings {
    /// Builds the address source the discovery loop polls.
    pub fn backend_source(&self) -> Arc<dyn BackendSource> {
        match &self.source {
            SourceSetting::Static(list) => Arc::new(StaticBackendSource::new(list.clone())),
            SourceSetting::File(path) => Arc::new(FileBackendSource::new(path.clone())),
            SourceSetting::Env { var, default } => Arc::new(EnvBackendSource::new(var.clone(), default.clone())),
        }
    }
}

/// Reads one config file layer. A missing file is not an error; an
/// unreadable or unparsable one is.
fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = serde_json::from_str::<Config>(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(Some(config))
}

/// Layers the config file under the given command line / environment layer.
/// Returns the merged configuration and the file it read, if any.
pub fn resolve_layers(cli: Config) -> Result<(Config, Option<PathBuf>)> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current = Config::defaults();
    let loaded_from = match read_config_file(&config_file_path)? {
        Some(file_config) => {
            current = current.merge(file_config);
            Some(config_file_path)
        }
        None => None,
    };

    Ok((current.merge(cli), loaded_from))
}

/// Parses the command line and environment, then resolves all layers.
pub fn load_config() -> Result<(Config, Option<PathBuf>)> {
    resolve_layers(Config::parse())
}
