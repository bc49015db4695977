//! Configuration validation.
//!
//! Runs on the environment-derived fields only. Overlay groups are best-effort
//! and never block startup.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: `&AppConfig → Result<(), Vec<ValidationError>>`

use thiserror::Error;

use crate::config::schema::AppConfig;

/// Run modes the service understands.
pub const RUN_MODES: &[&str] = &["debug", "release", "test"];

/// A single semantic violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("HOST must not be empty")]
    EmptyHost,

    #[error("RUN_MODE `{0}` is not one of debug, release, test")]
    UnknownRunMode(String),

    #[error("POSTGRES_MAX_IDLE ({idle}) exceeds POSTGRES_MAX_OPEN ({open})")]
    IdleExceedsOpen { idle: u32, open: u32 },
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost);
    }

    if !RUN_MODES.contains(&config.run_mode.as_str()) {
        errors.push(ValidationError::UnknownRunMode(config.run_mode.clone()));
    }

    // zero means unlimited
    let store = &config.datastore;
    if store.max_open > 0 && store.max_idle > store.max_open {
        errors.push(ValidationError::IdleExceedsOpen {
            idle: store.max_idle,
            open: store.max_open,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_violation() {
        let mut config = AppConfig::default();
        config.host = "  ".into();
        config.run_mode = "staging".into();
        config.datastore.max_open = 2;
        config.datastore.max_idle = 5;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::UnknownRunMode("staging".into())));
    }

    #[test]
    fn unlimited_pool_accepts_any_idle_count() {
        let mut config = AppConfig::default();
        config.datastore.max_open = 0;
        config.datastore.max_idle = 50;
        assert!(validate_config(&config).is_ok());
    }
}
