//! Migrator-specific error types

use connector::ConnectorError;
use shared::{ApiFailure, EntityType, SharedError, SourceId};
use std::path::PathBuf;
use thiserror::Error;

/// Safety code raised when a create response reuses a destination id owned by another source record
pub const DESTINATION_OVERWRITE_BLOCKED: &str = "DESTINATION_OVERWRITE_BLOCKED";

#[derive(Error, Debug)]
pub enum MigratorError {
    #[error("Creating {entity_type} failed: {failure}")]
    RootEntityFailed {
        entity_type: EntityType,
        failure: ApiFailure,
        recommendation: String,
    },

    #[error("Safety violation [{code}]: {message}")]
    Safety { code: String, message: String },

    #[error("State persistence failed for {path}: {message}")]
    State { path: PathBuf, message: String },

    #[error("Another run holds the lock at {lock_path}")]
    AlreadyRunning { lock_path: PathBuf },

    #[error("The last run has nothing left to roll back")]
    NothingToRollback,

    #[error("None of the {} requested leads exist in the source", requested.len())]
    LeadsNotFound { requested: Vec<SourceId> },

    #[error("Configuration error: {field}: {message}")]
    Configuration { field: String, message: String },

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigratorError {
    pub fn state(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::State {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Remediation hint shown next to the error in the run summary
    pub fn recommendation(&self) -> Option<String> {
        match self {
            Self::RootEntityFailed { recommendation, .. } => Some(recommendation.clone()),
            Self::Safety { .. } => Some(
                "Stop further batches and inspect the migration index and destination before re-running".to_string(),
            ),
            Self::State { .. } | Self::Io(_) | Self::Json(_) => {
                Some("Check that the state directory is writable and its JSON documents are intact".to_string())
            }
            Self::AlreadyRunning { .. } => {
                Some("Wait for the active run to finish, or remove a stale lock file left by a crashed run".to_string())
            }
            Self::Configuration { .. } | Self::Connector(_) => {
                Some("Fix the configuration and invoke the batch again".to_string())
            }
            Self::LeadsNotFound { .. } => Some("Check the lead ids against the source account".to_string()),
            Self::NothingToRollback | Self::Shared(_) => None,
        }
    }
}

/// Recommendation attached to a root-entity failure, keyed on what the destination said
pub fn recommend_for(entity_type: EntityType, failure: &ApiFailure) -> String {
    match failure {
        ApiFailure::ClientError { status: 400 | 422, .. } => format!(
            "The destination rejected the {entity_type} payload; re-run stage and field sync before retrying"
        ),
        ApiFailure::ClientError { status: 401 | 403, .. } => {
            "Destination credentials were refused; refresh the access token".to_string()
        }
        ApiFailure::ServerError { .. } | ApiFailure::NetworkError(_) => {
            "The destination stayed unavailable after all retries; invoke the batch again later".to_string()
        }
        _ => format!("Resolve the {entity_type} failure and invoke the batch again; the offset was not advanced"),
    }
}

pub type MigratorResult<T> = Result<T, MigratorError>;
