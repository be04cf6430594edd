//! Runtime configuration.
//!
//! Defaults first, then `MEALFLOW_*` environment variables; the CLI layers
//! its own flags on top.

use serde::{Deserialize, Serialize};

use crate::error::MealflowError;

pub const ENV_RECORD_REJECTIONS: &str = "MEALFLOW_RECORD_REJECTIONS";
#[cfg(feature = "sqlite")]
pub const ENV_DATABASE: &str = "MEALFLOW_DATABASE";
#[cfg(feature = "sqlite")]
pub const ENV_BUSY_TIMEOUT_MS: &str = "MEALFLOW_BUSY_TIMEOUT_MS";

/// What happens to a meal request that fails safety validation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Write nothing; the caller only gets the violations
    #[default]
    Discard,
    /// Keep a `Rejected` request and its items as an audit trail, no tray
    Record,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub rejection_policy: RejectionPolicy,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, MealflowError> {
        let mut config = ServiceConfig::default();
        if let Some(flag) = env_var(ENV_RECORD_REJECTIONS) {
            if parse_flag(ENV_RECORD_REJECTIONS, &flag)? {
                config.rejection_policy = RejectionPolicy::Record;
            }
        }
        Ok(config)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_flag(key: &str, value: &str) -> Result<bool, MealflowError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(MealflowError::input(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

#[cfg(feature = "sqlite")]
pub use sqlite_config::SqliteConfig;

#[cfg(feature = "sqlite")]
mod sqlite_config {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    pub const DEFAULT_DATABASE: &str = "mealflow.db";
    pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

    /// Where the SQLite backend keeps its data
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct SqliteConfig {
        pub path: PathBuf,
        /// How long a writer waits on a locked database before failing
        pub busy_timeout: Duration,
    }

    impl Default for SqliteConfig {
        fn default() -> Self {
            SqliteConfig {
                path: PathBuf::from(DEFAULT_DATABASE),
                busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            }
        }
    }

    impl SqliteConfig {
        pub fn from_env() -> Result<Self, MealflowError> {
            let mut config = SqliteConfig::default();
            if let Some(path) = env_var(ENV_DATABASE) {
                config.path = PathBuf::from(path);
            }
            if let Some(millis) = env_var(ENV_BUSY_TIMEOUT_MS) {
                let millis: u64 = millis.trim().parse().map_err(|_| {
                    MealflowError::input(format!(
                        "{ENV_BUSY_TIMEOUT_MS} must be a whole number of milliseconds"
                    ))
                })?;
                config.busy_timeout = Duration::from_millis(millis);
            }
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_parsing() {
        assert!(parse_flag("X", "TRUE").unwrap());
        assert!(parse_flag("X", " 1 ").unwrap());
        assert!(!parse_flag("X", "off").unwrap());
        let err = parse_flag("X", "maybe").unwrap_err();
        assert_eq!(err.to_string(), "X must be a boolean, got 'maybe'");
    }

    #[test]
    fn test_default_policy_discards_rejections() {
        assert_eq!(ServiceConfig::default().rejection_policy, RejectionPolicy::Discard);
        let parsed: ServiceConfig = serde_json::from_str(r#"{"rejection_policy":"record"}"#).unwrap();
        assert_eq!(parsed.rejection_policy, RejectionPolicy::Record);
    }
}
