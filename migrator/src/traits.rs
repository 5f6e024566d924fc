//! Collaborator traits for the migrator, with mockall mock generation
//!
//! Remote record stores live in `connector::traits`; the traits here cover the
//! migrator's own seams: durable state, payload transformation and progress
//! reporting.

use serde_json::Value;
use shared::{BatchConfig, Issue, ProgressSnapshot, RunState, SourceRecord};
use uuid::Uuid;

use crate::core::{BlockedAttemptLog, IdentityIndex, Mappings};
use crate::error::MigratorResult;

/// Durable documents for one migration target.
///
/// Every save replaces the whole document atomically.
#[mockall::automock]
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    async fn load_index(&self) -> MigratorResult<IdentityIndex>;
    async fn save_index(&self, index: &IdentityIndex) -> MigratorResult<()>;

    async fn load_blocked(&self) -> MigratorResult<BlockedAttemptLog>;
    async fn save_blocked(&self, log: &BlockedAttemptLog) -> MigratorResult<()>;

    async fn load_batch_config(&self) -> MigratorResult<BatchConfig>;
    async fn save_batch_config(&self, config: &BatchConfig) -> MigratorResult<()>;

    /// Summary and created ledger of the most recent run
    async fn load_last_run(&self) -> MigratorResult<Option<RunState>>;
    async fn save_last_run(&self, run: &RunState) -> MigratorResult<()>;

    /// Stage and field mappings; absent documents load as `None`
    async fn load_mappings(&self) -> MigratorResult<Mappings>;

    /// Fails with `AlreadyRunning` while another run holds the lock
    async fn acquire_run_lock(&self, run_id: Uuid) -> MigratorResult<()>;
    async fn release_run_lock(&self) -> MigratorResult<()>;
}

/// Destination payload plus any attributes that had to be dropped
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    pub payload: Value,
    pub warnings: Vec<Issue>,
}

/// Turns a source record into a destination payload. Must not touch ids or links.
#[mockall::automock]
pub trait RecordTransformer: Send + Sync {
    fn transform(&self, record: &SourceRecord, mappings: &Mappings) -> TransformOutcome;
}

/// Receives a snapshot after each orchestrator step
#[mockall::automock]
pub trait ProgressSink: Send + Sync {
    fn publish(&self, snapshot: &ProgressSnapshot);
}
