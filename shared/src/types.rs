//! Core shared types and identifiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Kinds of business records moved between the two record stores
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Companies,
    Contacts,
    Leads,
    Tasks,
    Notes,
}

impl EntityType {
    /// Creation order: parents strictly before children
    pub const CREATION_ORDER: [EntityType; 5] = [
        EntityType::Companies,
        EntityType::Contacts,
        EntityType::Leads,
        EntityType::Tasks,
        EntityType::Notes,
    ];

    /// Rollback order: children strictly before parents
    pub const ROLLBACK_ORDER: [EntityType; 5] = [
        EntityType::Tasks,
        EntityType::Notes,
        EntityType::Leads,
        EntityType::Contacts,
        EntityType::Companies,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Companies => "companies",
            EntityType::Contacts => "contacts",
            EntityType::Leads => "leads",
            EntityType::Tasks => "tasks",
            EntityType::Notes => "notes",
        }
    }

    /// Root entities drive linkage; their create failures are fatal to a batch
    pub fn is_root(&self) -> bool {
        matches!(self, EntityType::Companies | EntityType::Contacts | EntityType::Leads)
    }

    pub fn is_dependent(&self) -> bool {
        !self.is_root()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = crate::errors::SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "companies" | "company" => Ok(EntityType::Companies),
            "contacts" | "contact" => Ok(EntityType::Contacts),
            "leads" | "lead" | "deals" | "deal" => Ok(EntityType::Leads),
            "tasks" | "task" => Ok(EntityType::Tasks),
            "notes" | "note" => Ok(EntityType::Notes),
            other => Err(crate::errors::SharedError::InvalidConfig {
                field: "entity_type".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Identifier of a record in the source store
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

/// Identifier of a record in the destination store
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self(n.to_string())
            }
        }
    };
}

string_id!(SourceId);
string_id!(DestinationId);

/// Reference from one source record to another (embedded link or parent)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub id: SourceId,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, id: impl Into<SourceId>) -> Self {
        Self { entity_type, id: id.into() }
    }
}

/// Reference to a record that exists in the destination store
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationRef {
    pub entity_type: EntityType,
    pub id: DestinationId,
}

impl DestinationRef {
    pub fn new(entity_type: EntityType, id: impl Into<DestinationId>) -> Self {
        Self { entity_type, id: id.into() }
    }
}

/// A record as read from the source store.
///
/// Only the identifying and relational fields are interpreted by the engine;
/// `attributes` is handed to the record transformer untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: SourceId,
    pub entity_type: EntityType,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub stage_id: Option<String>,
    /// Owning record for tasks and notes
    #[serde(default)]
    pub parent: Option<EntityRef>,
    /// Embedded links (a lead's contacts and companies)
    #[serde(default)]
    pub links: Vec<EntityRef>,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl SourceRecord {
    pub fn new(entity_type: EntityType, id: impl Into<SourceId>) -> Self {
        Self {
            id: id.into(),
            entity_type,
            owner_id: None,
            stage_id: None,
            parent: None,
            links: Vec::new(),
            attributes: serde_json::Value::Null,
        }
    }

    /// Ids of linked records of one type, in link order
    pub fn linked(&self, entity_type: EntityType) -> impl Iterator<Item = &SourceId> {
        self.links
            .iter()
            .filter(move |link| link.entity_type == entity_type)
            .map(|link| &link.id)
    }
}

/// Eligibility criteria applied to root records before slicing
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Empty means every owner is eligible
    #[serde(default)]
    pub owner_ids: Vec<String>,
}

impl FilterCriteria {
    pub fn matches(&self, record: &SourceRecord) -> bool {
        if self.owner_ids.is_empty() {
            return true;
        }
        record
            .owner_id
            .as_ref()
            .map(|owner| self.owner_ids.iter().any(|o| o == owner))
            .unwrap_or(false)
    }
}

/// Persisted cursor state for a multi-invocation transfer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub filter: FilterCriteria,
    #[serde(default = "BatchConfig::default_page_size")]
    pub page_size: usize,
    /// Count of eligible root records already attempted
    #[serde(default)]
    pub offset: usize,
}

impl BatchConfig {
    fn default_page_size() -> usize {
        10
    }

    /// Slice bounds `[offset, offset + page_size)` clamped to `eligible`
    pub fn slice_bounds(&self, eligible: usize) -> (usize, usize) {
        let from = self.offset.min(eligible);
        let to = self.offset.saturating_add(self.page_size).min(eligible);
        (from, to)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            filter: FilterCriteria::default(),
            page_size: Self::default_page_size(),
            offset: 0,
        }
    }
}

/// Lifecycle of one orchestrator invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Error,
    RollingBack,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::RollingBack => "rolling_back",
        };
        f.write_str(s)
    }
}

/// A user-visible error or warning with an optional remediation hint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub recommendation: Option<String>,
}

impl Issue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            recommendation: None,
        }
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

/// Per-entity-type outcome counts for one run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_eligible: usize,
    pub total_transferred: usize,
    pub remaining: usize,
    #[serde(default)]
    pub per_entity: BTreeMap<EntityType, EntityCounts>,
}

impl RunStats {
    pub fn counts(&self, entity_type: EntityType) -> EntityCounts {
        self.per_entity.get(&entity_type).copied().unwrap_or_default()
    }

    pub fn counts_mut(&mut self, entity_type: EntityType) -> &mut EntityCounts {
        self.per_entity.entry(entity_type).or_default()
    }
}

/// One destination record created by the current run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedEntry {
    pub seq: u64,
    pub entity_type: EntityType,
    pub source_id: SourceId,
    pub destination_id: DestinationId,
    /// Owning destination record for tasks and notes
    #[serde(default)]
    pub parent: Option<DestinationRef>,
    pub created_at: DateTime<Utc>,
}

/// Run-scoped ledger of created destination records.
///
/// This is the only authority rollback consults. Entries are kept in creation
/// order so a single root record and its dependents can be undone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedLedger {
    entries: Vec<CreatedEntry>,
    next_seq: u64,
}

impl CreatedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        entity_type: EntityType,
        source_id: SourceId,
        destination_id: DestinationId,
        parent: Option<DestinationRef>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(CreatedEntry {
            seq,
            entity_type,
            source_id,
            destination_id,
            parent,
            created_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[CreatedEntry] {
        &self.entries
    }

    pub fn entries_of(&self, entity_type: EntityType) -> impl Iterator<Item = &CreatedEntry> {
        self.entries.iter().filter(move |e| e.entity_type == entity_type)
    }

    /// Destination ids created for one entity type, in creation order
    pub fn ids(&self, entity_type: EntityType) -> Vec<DestinationId> {
        self.entries_of(entity_type).map(|e| e.destination_id.clone()).collect()
    }

    pub fn contains(&self, entity_type: EntityType, id: &DestinationId) -> bool {
        self.entries_of(entity_type).any(|e| &e.destination_id == id)
    }

    pub fn find(&self, entity_type: EntityType, id: &DestinationId) -> Option<&CreatedEntry> {
        self.entries_of(entity_type).find(|e| &e.destination_id == id)
    }

    /// Most recently created record of one type
    pub fn last_of(&self, entity_type: EntityType) -> Option<&CreatedEntry> {
        self.entries.iter().rev().find(|e| e.entity_type == entity_type)
    }

    /// Records created after `seq` whose parent is `parent`
    pub fn dependents_of(&self, parent: &DestinationRef, after_seq: u64) -> Vec<CreatedEntry> {
        self.entries
            .iter()
            .filter(|e| e.seq > after_seq && e.parent.as_ref() == Some(parent))
            .cloned()
            .collect()
    }

    pub fn remove(&mut self, entity_type: EntityType, id: &DestinationId) -> Option<CreatedEntry> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.entity_type == entity_type && &e.destination_id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, entity_type: EntityType) -> usize {
        self.entries_of(entity_type).count()
    }
}

/// In-memory state of one run; a summary is persisted for operator visibility
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub current_step: Option<String>,
    pub progress: Progress,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub created: CreatedLedger,
    pub stats: RunStats,
    /// How far this run moved the persisted offset (0 unless completed)
    #[serde(default)]
    pub offset_advanced_by: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn idle() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Idle,
            current_step: None,
            progress: Progress::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
            created: CreatedLedger::new(),
            stats: RunStats::default(),
            offset_advanced_by: 0,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start() -> Self {
        Self {
            status: RunStatus::Running,
            started_at: Some(Utc::now()),
            ..Self::idle()
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Error)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            run_id: self.run_id,
            status: self.status,
            step: self.current_step.clone(),
            progress: self.progress,
            warnings: self.warnings.clone(),
            errors: self.errors.clone(),
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Snapshot emitted to progress subscribers after each step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub step: Option<String>,
    pub progress: Progress,
    pub warnings: Vec<Issue>,
    pub errors: Vec<Issue>,
}

/// Read-only source-id to destination-id lookup (stage ids, custom field ids)
pub type StageMapping = BTreeMap<String, String>;

/// Per-entity-type custom field translation table
pub type FieldMapping = BTreeMap<EntityType, BTreeMap<String, String>>;
