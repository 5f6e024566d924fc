//! Connector data types exchanged with the record-store clients

use serde::{Deserialize, Serialize};
use shared::{DestinationId, DestinationRef, EntityType, SourceId, SourceRecord};

/// One page of source records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePage {
    pub records: Vec<SourceRecord>,
    /// Token for the following page; `None` once the listing is exhausted
    pub next_page: Option<String>,
}

/// Transformed payload ready to be created in the destination store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub source_id: SourceId,
    pub entity_type: EntityType,
    /// Owning destination record for tasks and notes
    pub parent: Option<DestinationRef>,
    pub payload: serde_json::Value,
}

/// Confirmation of one created destination record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRecord {
    pub id: DestinationId,
}

impl CreatedRecord {
    pub fn new(id: impl Into<DestinationId>) -> Self {
        Self { id: id.into() }
    }
}

/// How the destination removed a record during rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalOutcome {
    Deleted,
    /// The destination forbids hard deletes for this type; moved to an archived state
    Archived,
}
