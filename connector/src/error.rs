//! Connector error types

use thiserror::Error;

/// Result type for connector setup operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors raised while building clients; remote call failures use `shared::ApiFailure`
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP client error: {0}")]
    ClientBuild(#[from] reqwest::Error),
}
