//! Core migration state: identity index, blocked-attempt log, slicing and step aggregation

pub mod blocked_log;
pub mod identity_index;
pub mod outcome;
pub mod preflight;

pub use blocked_log::{BlockReason, BlockedAttempt, BlockedAttemptLog, BLOCKED_LOG_CAPACITY};
pub use identity_index::{validate_rollback_ids, IdentityIndex, IndexStats, Partition, RollbackPartition, Skipped};
pub use outcome::StepOutcome;
pub use preflight::{preflight_warnings, select_slice, BatchSlice, Mappings};
