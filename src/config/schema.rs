//! Configuration schema definitions.
//!
//! Primary fields and the datastore group are filled from the environment
//! (see `loader.rs`). The `database` and `cors` groups are overlay groups and
//! derive Serde traits so they can be decoded from a config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default request body limit: 2 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Root configuration for the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppConfig {
    /// Interface to bind (`HOST`).
    pub host: String,

    /// Port to bind (`PORT`).
    pub port: u16,

    /// Run mode (`RUN_MODE`): `debug`, `release` or `test`.
    pub run_mode: String,

    /// Deployment environment label (`ENV`).
    pub env: String,

    /// Largest request body accepted for mutating methods, in bytes (`MAX_BODY_SIZE`).
    pub max_body_size: usize,

    /// Datastore connection pool settings (`POSTGRES_*`).
    pub datastore: DatastoreConfig,

    /// Database overlay group (`database.*` / `DATABASE_*`).
    pub database: DatabaseConfig,

    /// Logging settings (`LOG_*`).
    pub logging: LoggingConfig,

    /// Cross-origin policy (overlay file `[cors]` section).
    pub cors: CorsConfig,
}

impl AppConfig {
    /// Address the listener binds to, as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_debug(&self) -> bool {
        self.run_mode == "debug"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            run_mode: "debug".to_string(),
            env: "debug".to_string(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            datastore: DatastoreConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

/// Datastore connection settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatastoreConfig {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,

    /// Maximum open connections in the pool.
    pub max_open: u32,

    /// Maximum idle connections kept in the pool.
    pub max_idle: u32,

    /// Maximum connection lifetime in hours.
    pub max_lifetime_hours: u64,
}

impl DatastoreConfig {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_hours * 3600)
    }
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            // WARNING: placeholder credentials, override through the environment.
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3306,
            database: "app".to_string(),
            max_open: 10,
            max_idle: 10,
            max_lifetime_hours: 24,
        }
    }
}

/// Database overlay group. Missing keys keep their zero value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Output format of the log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, one line per event.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub format: LogFormat,

    /// Include a call-stack snapshot in panic records.
    pub panic_stack: bool,

    /// Extra request-context keys appended to every access record.
    pub extra_keys: Vec<String>,

    /// Longest body snapshot kept in an access record, in bytes.
    pub max_data_len: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            panic_stack: true,
            extra_keys: Vec::new(),
            max_data_len: 4096,
        }
    }
}

/// Cross-origin policy applied before business logic.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allow_methods: Vec<String>,

    /// `*` allows any origin.
    pub allow_origins: Vec<String>,

    /// `*` allows any header.
    pub allow_headers: Vec<String>,

    pub allow_credentials: bool,

    /// Preflight cache duration in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allow_origins: vec!["*".to_string()],
            allow_headers: vec!["*".to_string()],
            allow_credentials: false,
            max_age_secs: 12 * 60 * 60,
        }
    }
}
