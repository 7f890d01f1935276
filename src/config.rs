//! Configuration module for linkwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;

use crate::probe::ProbeMode;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "linkwatch.db")
    pub db_path: String,
    /// Optional JSON media-profile table; the built-in table otherwise
    pub profiles_path: Option<PathBuf>,
    /// Probing primitive (default: auto)
    pub probe_mode: ProbeMode,
    /// Concurrent endpoint checks per batch request (default: 32)
    pub max_in_flight: usize,
    /// Health window when a request names none (default: 24)
    pub window_hours: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "linkwatch.db".to_string(),
            profiles_path: None,
            probe_mode: ProbeMode::Auto,
            max_in_flight: 32,
            window_hours: 24,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LINKWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `LINKWATCH_DB_PATH`: Database file path (default: "linkwatch.db")
    /// - `LINKWATCH_PROFILES`: Media-profile JSON file (optional)
    /// - `LINKWATCH_PROBE_MODE`: `auto`, `native` or `command` (default: auto)
    /// - `LINKWATCH_MAX_IN_FLIGHT`: Batch concurrency cap (default: 32)
    /// - `LINKWATCH_WINDOW_HOURS`: Default health window (default: 24)
    ///
    /// Values that do not parse keep their default.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port_str) = lookup("LINKWATCH_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Some(db_path) = lookup("LINKWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(path) = lookup("LINKWATCH_PROFILES") {
            if !path.trim().is_empty() {
                cfg.profiles_path = Some(PathBuf::from(path));
            }
        }

        if let Some(mode) = lookup("LINKWATCH_PROBE_MODE") {
            match mode.parse() {
                Ok(mode) => cfg.probe_mode = mode,
                Err(e) => tracing::warn!("Config: {}, keeping {}", e, cfg.probe_mode),
            }
        }

        if let Some(limit) = lookup("LINKWATCH_MAX_IN_FLIGHT") {
            if let Ok(limit) = limit.parse::<usize>() {
                if limit > 0 {
                    cfg.max_in_flight = limit;
                }
            }
        }

        if let Some(hours) = lookup("LINKWATCH_WINDOW_HOURS") {
            if let Ok(hours) = hours.parse() {
                cfg.window_hours = hours;
            }
        }

        cfg
    }
}
