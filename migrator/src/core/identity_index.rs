//! Persistent source-to-destination id map guarding against duplicate creates

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use shared::{component_warn, CreatedLedger, DestinationId, EntityType, SourceId};
use std::collections::BTreeMap;

use crate::core::blocked_log::{BlockReason, BlockedAttemptLog};
use crate::error::{MigratorError, MigratorResult, DESTINATION_OVERWRITE_BLOCKED};

const COMPONENT: &str = "identity-index";

type Entries = BTreeMap<EntityType, BTreeMap<SourceId, DestinationId>>;

/// A record the index already knows, with the destination id it maps to
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped<T> {
    pub item: T,
    pub source_id: SourceId,
    pub destination_id: DestinationId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition<T> {
    pub to_create: Vec<T>,
    pub skipped: Vec<Skipped<T>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackPartition {
    pub safe: Vec<DestinationId>,
    pub blocked: Vec<DestinationId>,
}

/// Per-entity-type counts for operator status output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub migrated: BTreeMap<EntityType, usize>,
    pub blocked_attempts: usize,
}

/// `(entity type, source id) -> destination id`.
///
/// Entries are written only after the destination confirmed a create. They
/// leave the index through an operator reset, or through rollback of the
/// exact destination record they point at. A reverse map answers ownership
/// questions; it is rebuilt on load and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityIndex {
    entries: Entries,
    owners: BTreeMap<EntityType, BTreeMap<DestinationId, SourceId>>,
}

impl Serialize for IdentityIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IdentityIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Entries::deserialize(deserializer).map(Self::from_entries)
    }
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_entries(entries: Entries) -> Self {
        let owners = entries
            .iter()
            .map(|(entity_type, map)| {
                let reverse = map.iter().map(|(src, dst)| (dst.clone(), src.clone())).collect();
                (*entity_type, reverse)
            })
            .collect();
        Self { entries, owners }
    }

    pub fn lookup(&self, entity_type: EntityType, source_id: &SourceId) -> Option<&DestinationId> {
        self.entries.get(&entity_type)?.get(source_id)
    }

    pub fn contains(&self, entity_type: EntityType, source_id: &SourceId) -> bool {
        self.lookup(entity_type, source_id).is_some()
    }

    /// Source record that currently owns `destination_id`
    pub fn owner_of(&self, entity_type: EntityType, destination_id: &DestinationId) -> Option<&SourceId> {
        self.owners.get(&entity_type)?.get(destination_id)
    }

    fn insert(&mut self, entity_type: EntityType, source_id: SourceId, destination_id: DestinationId) {
        let owners = self.owners.entry(entity_type).or_default();
        let previous = self
            .entries
            .entry(entity_type)
            .or_default()
            .insert(source_id.clone(), destination_id.clone());
        if let Some(previous) = previous {
            owners.remove(&previous);
        }
        owners.insert(destination_id, source_id);
    }

    pub fn len(&self, entity_type: EntityType) -> usize {
        self.entries.get(&entity_type).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(BTreeMap::is_empty)
    }

    /// Split `items` into records still to create and records already migrated.
    /// Every skip is written to `blocked`.
    pub fn filter_not_migrated<T, F>(
        &self,
        entity_type: EntityType,
        items: Vec<T>,
        source_id_of: F,
        blocked: &mut BlockedAttemptLog,
    ) -> Partition<T>
    where
        F: Fn(&T) -> &SourceId,
    {
        let mut to_create = Vec::new();
        let mut skipped = Vec::new();

        for item in items {
            let source_id = source_id_of(&item).clone();
            match self.lookup(entity_type, &source_id) {
                Some(destination_id) => {
                    blocked.record(
                        entity_type,
                        Some(source_id.clone()),
                        Some(destination_id.clone()),
                        BlockReason::AlreadyMigrated,
                    );
                    skipped.push(Skipped {
                        item,
                        source_id,
                        destination_id: destination_id.clone(),
                    });
                }
                None => to_create.push(item),
            }
        }

        Partition { to_create, skipped }
    }

    /// Record confirmed creates.
    ///
    /// A destination id already owned by a different source record is refused
    /// and logged; every other pair is still registered. Any refusal turns the
    /// result into a safety error once the whole batch has been processed.
    pub fn register_migrated_batch(
        &mut self,
        entity_type: EntityType,
        pairs: &[(SourceId, DestinationId)],
        blocked: &mut BlockedAttemptLog,
    ) -> MigratorResult<usize> {
        let mut registered = 0;
        let mut refused = Vec::new();
        for (source_id, destination_id) in pairs {
            if let Some(owner) = self.owner_of(entity_type, destination_id) {
                if owner != source_id {
                    let owner = owner.clone();
                    blocked.record(
                        entity_type,
                        Some(source_id.clone()),
                        Some(destination_id.clone()),
                        BlockReason::OverwriteBlocked,
                    );
                    component_warn!(
                        COMPONENT,
                        entity_type = %entity_type,
                        destination_id = %destination_id,
                        "Refusing to remap destination record owned by source {}",
                        owner
                    );
                    refused.push(format!("{destination_id} already belongs to source record {owner}, not {source_id}"));
                    continue;
                }
            }
            self.insert(entity_type, source_id.clone(), destination_id.clone());
            registered += 1;
        }

        if refused.is_empty() {
            return Ok(registered);
        }
        Err(MigratorError::Safety {
            code: DESTINATION_OVERWRITE_BLOCKED.to_string(),
            message: format!("{entity_type}: {}", refused.join("; ")),
        })
    }

    /// Drop the entry pointing at `destination_id`, if any
    pub fn remove_destination(&mut self, entity_type: EntityType, destination_id: &DestinationId) -> Option<SourceId> {
        let source_id = self.owners.get_mut(&entity_type)?.remove(destination_id)?;
        if let Some(map) = self.entries.get_mut(&entity_type) {
            map.remove(&source_id);
        }
        Some(source_id)
    }

    /// Wipe every entity type
    pub fn reset(&mut self) {
        self.entries.clear();
        self.owners.clear();
    }

    pub fn stats(&self, blocked: &BlockedAttemptLog) -> IndexStats {
        IndexStats {
            migrated: EntityType::CREATION_ORDER
                .iter()
                .map(|t| (*t, self.len(*t)))
                .collect(),
            blocked_attempts: blocked.len(),
        }
    }
}

/// Intersect rollback candidates with the run's ledger.
///
/// Only ids the run itself created come back as safe; whatever else the
/// identity index holds is irrelevant here.
pub fn validate_rollback_ids(
    entity_type: EntityType,
    candidates: &[DestinationId],
    ledger: &CreatedLedger,
    blocked: &mut BlockedAttemptLog,
) -> RollbackPartition {
    let mut partition = RollbackPartition::default();
    for id in candidates {
        if ledger.contains(entity_type, id) {
            partition.safe.push(id.clone());
        } else {
            blocked.record(entity_type, None, Some(id.clone()), BlockReason::NotInRunLedger);
            partition.blocked.push(id.clone());
        }
    }
    partition
}
