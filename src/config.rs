//! Server configuration.
//!
//! `Settings` is loaded once by the master before any worker is forked; each
//! worker inherits a private copy at fork time and never re-reads the file.

use anyhow::Context;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::path::Path;

pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_LISTEN_PORT: u16 = 8080;
pub const DEFAULT_ROOT_PATH: &str = "./www";

/// Path used when neither an argument nor `PREFORK_CONFIG` names a file.
pub const DEFAULT_CONFIG_PATH: &str = "server.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub worker_count: usize,
    pub listen_address: String,
    pub listen_port: u16,
    pub root_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            root_path: DEFAULT_ROOT_PATH.to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from a YAML file.
    ///
    /// A missing file yields the defaults. Fields that are absent or carry a
    /// value of the wrong shape fall back to their default individually.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        Self::from_yaml_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let doc: Value = serde_yaml::from_str(text).context("config is not valid YAML")?;

        let map = match doc {
            Value::Mapping(map) => map,
            // An empty document parses as null
            Value::Null => Mapping::new(),
            _ => anyhow::bail!("config root must be a mapping"),
        };

        let defaults = Self::default();

        let worker_count = match field(&map, "worker_count").map(Value::as_u64) {
            None => defaults.worker_count,
            Some(Some(n)) if n > 0 => n as usize,
            Some(_) => {
                tracing::warn!(default = defaults.worker_count, "worker_count must be a positive integer");
                defaults.worker_count
            }
        };

        let listen_address = match field(&map, "listen_address").map(Value::as_str) {
            None => defaults.listen_address,
            Some(Some(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(_) => {
                tracing::warn!(default = %defaults.listen_address, "listen_address must be a string");
                defaults.listen_address
            }
        };

        let listen_port = match field(&map, "listen_port").map(Value::as_u64) {
            None => defaults.listen_port,
            Some(Some(n)) if n <= u16::MAX as u64 => n as u16,
            Some(_) => {
                tracing::warn!(default = defaults.listen_port, "listen_port must fit in 16 bits");
                defaults.listen_port
            }
        };

        let root_path = match field(&map, "root_path").map(Value::as_str) {
            None => defaults.root_path,
            Some(Some(s)) if !s.is_empty() => s.to_string(),
            Some(_) => {
                tracing::warn!(default = %defaults.root_path, "root_path must be a string");
                defaults.root_path
            }
        };

        Ok(Self {
            worker_count,
            listen_address,
            listen_port,
            root_path,
        })
    }

    /// `address:port`, bracketing IPv6 literals.
    pub fn bind_addr(&self) -> String {
        if self.listen_address.contains(':') && !self.listen_address.starts_with('[') {
            format!("[{}]:{}", self.listen_address, self.listen_port)
        } else {
            format!("{}:{}", self.listen_address, self.listen_port)
        }
    }
}

fn field<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(Value::String(key.to_string()))
}

/// Resolves the config path from the first argument, then `PREFORK_CONFIG`.
pub fn config_path(args: impl IntoIterator<Item = String>) -> String {
    args.into_iter()
        .nth(1)
        .or_else(|| std::env::var("PREFORK_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// Configuration for one backend of the hash router.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Configuration for the standalone hash router.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_router_listen")]
    pub listen_addr: String,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

fn default_router_listen() -> String {
    "127.0.0.1:9000".to_string()
}

impl RouterConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read router config {}", path.display()))?;

        serde_yaml::from_str(&text)
            .with_context(|| format!("invalid router config {}", path.display()))
    }
}
