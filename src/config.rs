//! Server configuration.
//!
//! All options are read once at startup; there is no hot reload. Values can
//! come from an optional TOML file and are overlaid with `REACTORWEB_*`
//! environment variables.

use std::{env, fs, path::Path};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Readiness-trigger configuration for the listening and connection sockets.
///
/// mio's epoll backend reports events edge-triggered at the OS level
/// regardless of this setting; what
/// this selects is whether the reactor *drains* a source to `WouldBlock`
/// (edge-triggered discipline) or handles one readiness notification per
/// event (level-triggered discipline, relying on the next `wait` to report
/// the fd again if data remains).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Level-triggered listener, level-triggered connections.
    LevelLevel,
    /// Level-triggered listener, edge-triggered connections.
    LevelEdge,
    /// Edge-triggered listener, level-triggered connections.
    EdgeLevel,
    /// Edge-triggered listener, edge-triggered connections.
    EdgeEdge,
}

impl TriggerMode {
    /// Whether the listening socket should be drained to `WouldBlock` on
    /// each accept-readiness notification.
    pub fn listener_edge_triggered(self) -> bool {
        matches!(self, TriggerMode::EdgeLevel | TriggerMode::EdgeEdge)
    }

    /// Whether per-connection sockets should be drained to `WouldBlock`.
    pub fn conn_edge_triggered(self) -> bool {
        matches!(self, TriggerMode::LevelEdge | TriggerMode::EdgeEdge)
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(TriggerMode::LevelLevel),
            1 => Some(TriggerMode::LevelEdge),
            2 => Some(TriggerMode::EdgeLevel),
            3 => Some(TriggerMode::EdgeEdge),
            _ => None,
        }
    }
}

impl Default for TriggerMode {
    fn default() -> Self {
        TriggerMode::EdgeEdge
    }
}

/// Database connection parameters. Host is always `localhost`.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_db_pool_size")]
    pub pool_size: usize,
}

fn default_db_port() -> u16 {
    3306
}
fn default_db_user() -> String {
    "root".into()
}
fn default_db_name() -> String {
    "webserver".into()
}
fn default_db_pool_size() -> usize {
    8
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            port: default_db_port(),
            user: default_db_user(),
            password: String::new(),
            name: default_db_name(),
            pool_size: default_db_pool_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_queue_size")]
    pub queue_size: usize,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_queue_size() -> usize {
    1024
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            enabled: default_true(),
            level: default_log_level(),
            queue_size: default_log_queue_size(),
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub trigger_mode: TriggerModeField,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default)]
    pub linger: bool,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default = "default_doc_root")]
    pub doc_root: String,
}

/// Newtype so `trigger_mode` can be deserialized either as a small
/// integer (0-3) or as a named variant, and still implement `Default`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum TriggerModeField {
    Numeric(u8),
    Named(TriggerMode),
}

impl Default for TriggerModeField {
    fn default() -> Self {
        TriggerModeField::Named(TriggerMode::default())
    }
}

impl TriggerModeField {
    pub fn resolve(self) -> Result<TriggerMode> {
        match self {
            TriggerModeField::Named(m) => Ok(m),
            TriggerModeField::Numeric(n) => TriggerMode::from_u8(n)
                .ok_or_else(|| Error::Config(format!("trigger_mode must be 0-3, got {n}"))),
        }
    }
}

fn default_port() -> u16 {
    8080
}
fn default_idle_timeout_ms() -> u64 {
    60_000
}
fn default_worker_threads() -> usize {
    8
}
fn default_doc_root() -> String {
    "resources".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_port(),
            trigger_mode: TriggerModeField::default(),
            idle_timeout_ms: default_idle_timeout_ms(),
            linger: false,
            db: DbConfig::default(),
            worker_threads: default_worker_threads(),
            log: LogConfig::default(),
            doc_root: default_doc_root(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from an optional TOML file, then overlays a
    /// handful of `REACTORWEB_*` environment variables on top. Missing file
    /// or missing environment variables fall back to defaults; malformed
    /// values are a configuration error, not a panic.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg: ServerConfig = match path {
            Some(p) if p.exists() => {
                let text = fs::read_to_string(p).map_err(Error::Io)?;
                toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?
            }
            _ => ServerConfig::default(),
        };

        if let Ok(v) = env::var("REACTORWEB_PORT") {
            cfg.port = v
                .parse()
                .map_err(|_| Error::Config(format!("REACTORWEB_PORT invalid: {v}")))?;
        }
        if let Ok(v) = env::var("REACTORWEB_WORKER_THREADS") {
            cfg.worker_threads = v
                .parse()
                .map_err(|_| Error::Config(format!("REACTORWEB_WORKER_THREADS invalid: {v}")))?;
        }
        if let Ok(v) = env::var("REACTORWEB_IDLE_TIMEOUT_MS") {
            cfg.idle_timeout_ms = v
                .parse()
                .map_err(|_| Error::Config(format!("REACTORWEB_IDLE_TIMEOUT_MS invalid: {v}")))?;
        }
        if let Ok(v) = env::var("REACTORWEB_DB_PASSWORD") {
            cfg.db.password = v;
        }

        Ok(cfg)
    }
}
