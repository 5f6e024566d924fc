//! Shared error types for the migration engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Invalid configuration: {field} = {value}")]
    InvalidConfig { field: String, value: String },
}

/// Outcome of a failed remote call, already classified from the transport response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiFailure {
    /// HTTP 429; `retry_after` is taken from the response header when present
    RateLimited { retry_after: Option<Duration> },
    /// HTTP 5xx
    ServerError { status: u16, message: String },
    /// Any other non-success status
    ClientError { status: u16, message: String },
    /// HTTP 404
    NotFound,
    /// Transport failure before a status was received
    NetworkError(String),
    /// A success status with a body that could not be interpreted
    InvalidResponse(String),
    /// A call refused locally because it would mutate a protected store
    SafetyViolation { code: String, operation: String },
}

impl ApiFailure {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        match status {
            429 => ApiFailure::RateLimited { retry_after },
            404 => ApiFailure::NotFound,
            500..=599 => ApiFailure::ServerError { status, message: message.into() },
            _ => ApiFailure::ClientError { status, message: message.into() },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiFailure::RateLimited { .. } => Some(429),
            ApiFailure::NotFound => Some(404),
            ApiFailure::ServerError { status, .. } | ApiFailure::ClientError { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiFailure::NotFound)
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiFailure::RateLimited { retry_after: Some(d) } => {
                write!(f, "rate limited (retry after {}s)", d.as_secs())
            }
            ApiFailure::RateLimited { retry_after: None } => write!(f, "rate limited"),
            ApiFailure::ServerError { status, message } => write!(f, "server error {status}: {message}"),
            ApiFailure::ClientError { status, message } => write!(f, "request rejected {status}: {message}"),
            ApiFailure::NotFound => write!(f, "not found"),
            ApiFailure::NetworkError(msg) => write!(f, "network error: {msg}"),
            ApiFailure::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
            ApiFailure::SafetyViolation { code, operation } => write!(f, "{code}: {operation} refused"),
        }
    }
}

impl std::error::Error for ApiFailure {}
