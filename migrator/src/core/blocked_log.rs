//! Bounded diagnostic log of skipped and refused operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{DestinationId, EntityType, SourceId};
use std::collections::VecDeque;

pub const BLOCKED_LOG_CAPACITY: usize = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Source record already present in the identity index
    AlreadyMigrated,
    /// Create response reused a destination id owned by another source record
    OverwriteBlocked,
    /// Rollback candidate not created by the run being rolled back
    NotInRunLedger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedAttempt {
    pub timestamp: DateTime<Utc>,
    pub entity_type: EntityType,
    #[serde(default)]
    pub source_id: Option<SourceId>,
    #[serde(default)]
    pub destination_id: Option<DestinationId>,
    pub reason: BlockReason,
}

/// Oldest entries are dropped once the log reaches capacity
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockedAttemptLog {
    entries: VecDeque<BlockedAttempt>,
}

impl BlockedAttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        entity_type: EntityType,
        source_id: Option<SourceId>,
        destination_id: Option<DestinationId>,
        reason: BlockReason,
    ) {
        self.entries.push_back(BlockedAttempt {
            timestamp: Utc::now(),
            entity_type,
            source_id,
            destination_id,
            reason,
        });
        while self.entries.len() > BLOCKED_LOG_CAPACITY {
            self.entries.pop_front();
        }
    }

    /// Up to `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<BlockedAttempt> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
