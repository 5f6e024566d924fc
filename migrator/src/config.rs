//! Endpoint credentials and pacing settings from the environment
//!
//! Values are read from the process environment after loading a `.env` file
//! from the current directory or its parents, if one exists. Process
//! environment variables take precedence over `.env` values.
//!
//! ## Required
//! - `SOURCE_BASE_URL`, `SOURCE_TOKEN`: read-only source record store
//! - `DEST_BASE_URL`, `DEST_TOKEN`: destination record store
//!
//! ## Optional
//! - `MAX_REQUESTS_PER_SECOND` (7), `MAX_RETRIES` (4), `RETRY_BASE_DELAY_MS` (1000),
//!   `DEFAULT_RETRY_AFTER_SECS` (5)
//! - `CREATE_CHUNK_SIZE` (50): records per destination create call
//! - `DEST_PIPELINE_ID`: pipeline stamped into lead payloads
//! - `DEST_LOST_STATUS_ID` (143): stage leads are moved to when rolled back
//! - `TERMINAL_STAGE_IDS` (`142,143`): won/lost stages excluded from mapping checks

use connector::RetryPolicy;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MigratorError, MigratorResult};

pub const DEFAULT_CREATE_CHUNK_SIZE: usize = 50;
pub const DEFAULT_LOST_STATUS_ID: u64 = 143;
pub const DEFAULT_TERMINAL_STAGE_IDS: &[&str] = &["142", "143"];

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSettings {
    pub base_url: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSettings {
    pub source: EndpointSettings,
    pub destination: EndpointSettings,
    pub max_requests_per_second: u32,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub default_retry_after: Duration,
    pub create_chunk_size: usize,
    pub pipeline_id: Option<String>,
    pub lost_status_id: u64,
    pub terminal_stage_ids: Vec<String>,
}

impl MigrationSettings {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> MigratorResult<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> MigratorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> MigratorResult<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| MigratorError::configuration(key, "must be set"))
        };

        let chunk_size: usize = parse_or(&lookup, "CREATE_CHUNK_SIZE", DEFAULT_CREATE_CHUNK_SIZE)?;
        if chunk_size == 0 {
            return Err(MigratorError::configuration("CREATE_CHUNK_SIZE", "must be at least 1"));
        }
        let rps: u32 = parse_or(&lookup, "MAX_REQUESTS_PER_SECOND", RetryPolicy::DEFAULT_MAX_REQUESTS_PER_SECOND)?;
        if rps == 0 {
            return Err(MigratorError::configuration("MAX_REQUESTS_PER_SECOND", "must be at least 1"));
        }

        let terminal_stage_ids = match lookup("TERMINAL_STAGE_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => DEFAULT_TERMINAL_STAGE_IDS.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            source: EndpointSettings {
                base_url: required("SOURCE_BASE_URL")?,
                token: required("SOURCE_TOKEN")?,
            },
            destination: EndpointSettings {
                base_url: required("DEST_BASE_URL")?,
                token: required("DEST_TOKEN")?,
            },
            max_requests_per_second: rps,
            max_retries: parse_or(&lookup, "MAX_RETRIES", RetryPolicy::DEFAULT_MAX_RETRIES)?,
            retry_base_delay: Duration::from_millis(parse_or(&lookup, "RETRY_BASE_DELAY_MS", RetryPolicy::DEFAULT_BASE_DELAY_MS)?),
            default_retry_after: Duration::from_secs(parse_or(
                &lookup,
                "DEFAULT_RETRY_AFTER_SECS",
                RetryPolicy::DEFAULT_RETRY_AFTER_SECS,
            )?),
            create_chunk_size: chunk_size,
            pipeline_id: lookup("DEST_PIPELINE_ID").filter(|v| !v.trim().is_empty()),
            lost_status_id: parse_or(&lookup, "DEST_LOST_STATUS_ID", DEFAULT_LOST_STATUS_ID)?,
            terminal_stage_ids,
        })
    }

    /// Pacing and retry policy shared by both remote systems
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_requests_per_second,
            self.max_retries,
            self.retry_base_delay,
            self.default_retry_after,
        )
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> MigratorResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MigratorError::configuration(key, format!("'{raw}' is not a valid value"))),
    }
}
