//! Process configuration read from the environment.
//!
//! | Variable                    | Default     |
//! |-----------------------------|-------------|
//! | `RECKON_DATABASE_PATH`      | `reckon.db` |
//! | `RECKON_BUSY_TIMEOUT_MS`    | `5000`      |
//! | `RECKON_SCAN_PAGE_SIZE`     | `500`       |
//! | `RECKON_ABANDONED_RUN_SECS` | `86400`     |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::impls::sqlite_kv::DEFAULT_PAGE_SIZE;

pub const DATABASE_PATH_VAR: &str = "RECKON_DATABASE_PATH";
pub const BUSY_TIMEOUT_VAR: &str = "RECKON_BUSY_TIMEOUT_MS";
pub const SCAN_PAGE_SIZE_VAR: &str = "RECKON_SCAN_PAGE_SIZE";
pub const ABANDONED_RUN_VAR: &str = "RECKON_ABANDONED_RUN_SECS";

const DEFAULT_DATABASE_PATH: &str = "reckon.db";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_ABANDONED_RUN_SECS: u64 = 86_400;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("environment variable {0} is not valid unicode")]
    NotUnicode(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReckonConfig {
    /// Database file shared by the coordination store and the spilled KV tables.
    pub database_path: PathBuf,
    pub busy_timeout: Duration,
    /// Rows fetched per round trip when scanning a whole table.
    pub scan_page_size: usize,
    /// Issue tables of runs started longer ago than this are reclaimed.
    pub abandoned_run_after: Duration,
}

impl Default for ReckonConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            scan_page_size: DEFAULT_PAGE_SIZE,
            abandoned_run_after: Duration::from_secs(DEFAULT_ABANDONED_RUN_SECS),
        }
    }
}

impl ReckonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| match env::var(var) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode(var)),
        })
    }

    /// Same as [`ReckonConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Result<Option<String>, ConfigError>,
    {
        let defaults = Self::default();

        let database_path = match lookup(DATABASE_PATH_VAR)? {
            Some(value) if value.trim().is_empty() => {
                return Err(ConfigError::InvalidValue {
                    var: DATABASE_PATH_VAR,
                    value,
                    reason: "must not be empty",
                });
            }
            Some(value) => PathBuf::from(value),
            None => defaults.database_path,
        };

        let busy_timeout = match lookup(BUSY_TIMEOUT_VAR)? {
            Some(value) => Duration::from_millis(parse_number(BUSY_TIMEOUT_VAR, value)?),
            None => defaults.busy_timeout,
        };

        let scan_page_size = match lookup(SCAN_PAGE_SIZE_VAR)? {
            Some(value) => {
                let size = parse_number(SCAN_PAGE_SIZE_VAR, value.clone())?;
                if size == 0 {
                    return Err(ConfigError::InvalidValue {
                        var: SCAN_PAGE_SIZE_VAR,
                        value,
                        reason: "must be at least 1",
                    });
                }
                usize::try_from(size).map_err(|_| ConfigError::InvalidValue {
                    var: SCAN_PAGE_SIZE_VAR,
                    value,
                    reason: "too large",
                })?
            }
            None => defaults.scan_page_size,
        };

        let abandoned_run_after = match lookup(ABANDONED_RUN_VAR)? {
            Some(value) => Duration::from_secs(parse_number(ABANDONED_RUN_VAR, value)?),
            None => defaults.abandoned_run_after,
        };

        Ok(Self {
            database_path,
            busy_timeout,
            scan_page_size,
            abandoned_run_after,
        })
    }
}

fn parse_number(var: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue {
            var,
            value,
            reason: "expected a non-negative integer",
        })
}
