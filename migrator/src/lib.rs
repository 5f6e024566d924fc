//! Idempotent, resumable batch transfer of CRM records
//!
//! The migrator moves one slice of eligible leads, together with their
//! companies, contacts, tasks and notes, from a read-only source store into a
//! destination store. An identity index guarantees each source record is
//! created at most once; a run-scoped ledger makes every run reversible.

pub mod config;
pub mod core;
pub mod error;
pub mod migrator;
pub mod operations;
pub mod rollback;
pub mod services;
pub mod traits;
pub mod transfer;

// Re-export commonly used types
pub use crate::core::{BlockedAttemptLog, IdentityIndex, Mappings};
pub use config::MigrationSettings;
pub use error::{MigratorError, MigratorResult};
pub use migrator::{Migrator, MigratorOptions};
pub use operations::StatusReport;
pub use rollback::{RollbackReport, RollbackScope};
pub use traits::{ProgressSink, RecordTransformer, StateStore};
pub use transfer::{OwnerSummary, TransferReport};
