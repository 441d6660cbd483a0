//! Configuration module for Soilwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::store::DEFAULT_SAMPLES_PER_DAY;

use std::env;
use std::str::FromStr;

/// Longest retention horizon accepted from the environment (about a century).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Where engine state is persisted between restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Four JSON documents in a data directory.
    File,
    /// The same documents in a SQLite table.
    Sqlite,
    /// No durability.
    Memory,
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage mode: {}", other)),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 3000)
    pub http_port: u16,
    /// Persistence strategy (default: file)
    pub storage: StorageMode,
    /// Directory holding the JSON documents (default: "data")
    pub data_dir: String,
    /// Path to the SQLite database file (default: "soilwatch.db")
    pub db_path: String,
    /// Retention horizon for pump intervals and history (default: 7)
    pub retention_days: u32,
    /// Expected device cadence, sizes the history log (default: 2880)
    pub samples_per_day: u32,
    /// Informational pump runtime ceiling in seconds (default: 3600)
    pub max_daily_runtime: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 3000,
            storage: StorageMode::File,
            data_dir: "data".to_string(),
            db_path: "soilwatch.db".to_string(),
            retention_days: 7,
            samples_per_day: DEFAULT_SAMPLES_PER_DAY,
            max_daily_runtime: 3600,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SOILWATCH_HTTP_PORT` or `PORT`: HTTP port (default: 3000)
    /// - `SOILWATCH_STORAGE`: `file`, `sqlite` or `memory` (default: file)
    /// - `SOILWATCH_DATA_DIR`: JSON document directory (default: "data")
    /// - `SOILWATCH_DB_PATH`: SQLite file path (default: "soilwatch.db")
    /// - `SOILWATCH_RETENTION_DAYS`: retention horizon in days (default: 7, max: 36500)
    /// - `SOILWATCH_SAMPLES_PER_DAY`: history cadence (default: 2880)
    /// - `SOILWATCH_MAX_DAILY_RUNTIME`: runtime ceiling in seconds (default: 3600)
    ///
    /// Values that fail to parse are ignored.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = lookup("SOILWATCH_HTTP_PORT")
            .or_else(|| lookup("PORT"))
            .and_then(|s| s.parse().ok())
        {
            cfg.http_port = port;
        }

        if let Some(mode) = lookup("SOILWATCH_STORAGE") {
            match mode.parse() {
                Ok(mode) => cfg.storage = mode,
                Err(e) => tracing::warn!("Ignoring SOILWATCH_STORAGE: {}", e),
            }
        }

        if let Some(dir) = lookup("SOILWATCH_DATA_DIR") {
            cfg.data_dir = dir;
        }

        if let Some(path) = lookup("SOILWATCH_DB_PATH") {
            cfg.db_path = path;
        }

        if let Some(days) = lookup("SOILWATCH_RETENTION_DAYS").and_then(|s| s.parse().ok()) {
            if days > MAX_RETENTION_DAYS {
                tracing::warn!(
                    "Capping SOILWATCH_RETENTION_DAYS at {} (got {})",
                    MAX_RETENTION_DAYS,
                    days
                );
                cfg.retention_days = MAX_RETENTION_DAYS;
            } else if days > 0 {
                cfg.retention_days = days;
            }
        }

        if let Some(samples) = lookup("SOILWATCH_SAMPLES_PER_DAY").and_then(|s| s.parse().ok()) {
            if samples > 0 {
                cfg.samples_per_day = samples;
            }
        }

        if let Some(runtime) = lookup("SOILWATCH_MAX_DAILY_RUNTIME").and_then(|s| s.parse().ok()) {
            cfg.max_daily_runtime = runtime;
        }

        cfg
    }
}
