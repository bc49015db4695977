//! Two-phase configuration loading.
//!
//! Phase 1 reads primary fields from environment variables and is fatal on
//! failure. Phase 2 decodes overlay groups from an optional file plus
//! `DATABASE_*` variables and only ever degrades to defaults.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::schema::{AppConfig, DatastoreConfig, LogFormat, LoggingConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Overlay file read when no explicit path is given.
pub const DEFAULT_OVERLAY_FILE: &str = "config.toml";

/// Fatal configuration error. The process must not start listening.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {key}={value:?} is invalid: {reason}")]
    Env {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Non-fatal overlay error. The named group kept its defaults.
#[derive(Debug, Error)]
#[error("overlay group `{group}` ignored: {source}")]
pub struct OverlayError {
    pub group: &'static str,
    #[source]
    pub source: config::ConfigError,
}

/// Result of a successful load.
#[derive(Debug)]
pub struct Loaded {
    pub config: AppConfig,
    pub overlay_errors: Vec<OverlayError>,
}

/// Loads [`AppConfig`] from a snapshot of environment variables.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    vars: HashMap<String, String>,
    overlay_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Snapshot the process environment.
    pub fn from_env() -> Self {
        Self::with_vars(std::env::vars())
    }

    /// Use an explicit set of variables instead of the process environment.
    pub fn with_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            overlay_path: None,
        }
    }

    pub fn overlay_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.overlay_path = Some(path.into());
        self
    }

    /// Run both phases. Either the full structure is returned or loading fails.
    pub fn load(&self) -> Result<Loaded, ConfigError> {
        let mut config = self.load_primary()?;
        let overlay_errors = self.apply_overlay(&mut config);
        Ok(Loaded {
            config,
            overlay_errors,
        })
    }

    fn load_primary(&self) -> Result<AppConfig, ConfigError> {
        let defaults = AppConfig::default();
        let store = DatastoreConfig::default();
        let logging = LoggingConfig::default();

        let config = AppConfig {
            host: self.string("HOST", defaults.host),
            port: self.parse("PORT", defaults.port)?,
            run_mode: self.string("RUN_MODE", defaults.run_mode),
            env: self.string("ENV", defaults.env),
            max_body_size: self.parse("MAX_BODY_SIZE", defaults.max_body_size)?,
            datastore: DatastoreConfig {
                username: self.string("POSTGRES_USER", store.username),
                password: self.string("POSTGRES_PASS", store.password),
                host: self.string("POSTGRES_HOST", store.host),
                port: self.parse("POSTGRES_PORT", store.port)?,
                database: self.string("POSTGRES_DB", store.database),
                max_open: self.parse("POSTGRES_MAX_OPEN", store.max_open)?,
                max_idle: self.parse("POSTGRES_MAX_IDLE", store.max_idle)?,
                max_lifetime_hours: self
                    .parse("POSTGRES_MAX_LIFETIME", store.max_lifetime_hours)?,
            },
            database: defaults.database,
            logging: LoggingConfig {
                format: self.parse::<LogFormat>("LOG_FORMAT", logging.format)?,
                panic_stack: self.flag("LOG_PANIC_STACK", logging.panic_stack)?,
                extra_keys: self
                    .var("LOG_EXTRA_KEYS")
                    .map(split_list)
                    .unwrap_or(logging.extra_keys),
                max_data_len: self.parse("LOG_MAX_DATA", logging.max_data_len)?,
            },
            cors: defaults.cors,
        };

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn apply_overlay(&self, config: &mut AppConfig) -> Vec<OverlayError> {
        let mut errors = Vec::new();

        let path = self.overlay_path.clone().unwrap_or_else(|| {
            PathBuf::from(self.var("CONFIG_FILE").unwrap_or(DEFAULT_OVERLAY_FILE))
        });

        // database.url <-> DATABASE_URL
        let env = Environment::with_prefix("database")
            .prefix_separator("_")
            .separator("_")
            .keep_prefix(true)
            .ignore_empty(true)
            .source(Some(
                self.vars
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ));

        let overlay = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(env)
            .build();

        let overlay = match overlay {
            Ok(overlay) => overlay,
            Err(source) => {
                errors.push(OverlayError {
                    group: "overlay",
                    source,
                });
                return errors;
            }
        };

        config.database = decode_group(&overlay, "database", &mut errors);
        config.cors = decode_group(&overlay, "cors", &mut errors);
        errors
    }

    /// Variable value, with empty values treated as unset.
    fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.var(key).map(str::to_string).unwrap_or(default)
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.var(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
                key,
                value: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.var(key) else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "yes" | "on" => Ok(true),
            "0" | "f" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Env {
                key,
                value: raw.to_string(),
                reason: "expected a boolean".to_string(),
            }),
        }
    }
}

fn decode_group<T>(overlay: &Config, group: &'static str, errors: &mut Vec<OverlayError>) -> T
where
    T: DeserializeOwned + Default,
{
    match overlay.get::<T>(group) {
        Ok(value) => value,
        Err(config::ConfigError::NotFound(_)) => T::default(),
        Err(source) => {
            errors.push(OverlayError { group, source });
            T::default()
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn loader(vars: &[(&str, &str)]) -> ConfigLoader {
        ConfigLoader::with_vars(vars.iter().copied())
            .overlay_file("/nonexistent/service-bootstrap/config.toml")
    }

    #[test]
    fn unset_environment_yields_defaults() {
        let loaded = loader(&[]).load().unwrap();
        let config = loaded.config;

        assert!(loaded.overlay_errors.is_empty());
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.run_mode, "debug");
        assert_eq!(config.env, "debug");
        assert_eq!(config.datastore.max_open, 10);
        assert_eq!(config.datastore.max_idle, 10);
        assert_eq!(config.datastore.port, 3306);
        assert_eq!(config.datastore.host, "127.0.0.1");
        assert_eq!(config.datastore.max_lifetime().as_secs(), 24 * 3600);
        assert_eq!(config.max_body_size, 2 * 1024 * 1024);
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn non_numeric_port_is_fatal() {
        let err = loader(&[("PORT", "not-a-number")]).load().unwrap_err();
        match err {
            ConfigError::Env { key, value, .. } => {
                assert_eq!(key, "PORT");
                assert_eq!(value, "not-a-number");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = loader(&[("PORT", ""), ("HOST", " ")]).load().unwrap().config;
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn environment_overrides_primaries() {
        let config = loader(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9000"),
            ("RUN_MODE", "release"),
            ("POSTGRES_MAX_OPEN", "32"),
            ("LOG_FORMAT", "json"),
            ("LOG_PANIC_STACK", "0"),
            ("LOG_EXTRA_KEYS", "user_id, tenant ,"),
            ("MAX_BODY_SIZE", "65536"),
            ("LOG_MAX_DATA", "128"),
        ])
        .load()
        .unwrap()
        .config;

        assert_eq!(config.address(), "127.0.0.1:9000");
        assert!(!config.is_debug());
        assert_eq!(config.datastore.max_open, 32);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.logging.panic_stack);
        assert_eq!(config.logging.extra_keys, vec!["user_id", "tenant"]);
        assert_eq!(config.max_body_size, 65536);
        assert_eq!(config.logging.max_data_len, 128);
    }

    #[test]
    fn invalid_run_mode_fails_validation() {
        let err = loader(&[("RUN_MODE", "staging")]).load().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref e) if e.len() == 1));
    }

    #[test]
    fn database_group_reads_underscored_environment() {
        let loaded = loader(&[
            ("DATABASE_URL", "postgres://db.internal/app"),
            ("DATABASE_PORT", "5432"),
            ("DATABASE_USERNAME", "svc"),
        ])
        .load()
        .unwrap();

        assert!(loaded.overlay_errors.is_empty());
        let db = loaded.config.database;
        assert_eq!(db.url, "postgres://db.internal/app");
        assert_eq!(db.port, 5432);
        assert_eq!(db.username, "svc");
        assert_eq!(db.password, "");
    }

    #[test]
    fn empty_database_variables_are_ignored() {
        let loaded = loader(&[("DATABASE_PORT", ""), ("DATABASE_URL", "x")]).load().unwrap();
        assert!(loaded.overlay_errors.is_empty());
        assert_eq!(loaded.config.database.port, 0);
        assert_eq!(loaded.config.database.url, "x");
    }

    #[test]
    fn malformed_overlay_keeps_defaults() {
        let loaded = loader(&[("DATABASE_PORT", "many")]).load().unwrap();

        assert_eq!(loaded.overlay_errors.len(), 1);
        assert_eq!(loaded.overlay_errors[0].group, "database");
        assert_eq!(loaded.config.database, Default::default());
        assert_eq!(loaded.config.port, 8080);
    }

    #[test]
    fn overlay_file_merges_under_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[database]\nurl = \"postgres://from-file\"\nport = 6543\n\n[cors]\nallow_origins = [\"https://app.example\"]\nmax_age_secs = 60"
        )
        .unwrap();

        let loaded = ConfigLoader::with_vars([("DATABASE_PORT", "7000")])
            .overlay_file(file.path())
            .load()
            .unwrap();

        assert!(loaded.overlay_errors.is_empty());
        let config = loaded.config;
        assert_eq!(config.database.url, "postgres://from-file");
        assert_eq!(config.database.port, 7000);
        assert_eq!(config.cors.allow_origins, vec!["https://app.example"]);
        assert_eq!(config.cors.max_age_secs, 60);
        assert_eq!(config.cors.allow_methods.len(), 6);
    }
}
