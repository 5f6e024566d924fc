//! In-memory record stores and a builder for end-to-end migrator tests
//!
//! The fakes keep their state behind `Arc<Mutex<..>>` so a test can inspect
//! the destination after the migrator (which owns its clients) has run, and
//! can build a fresh migrator over the same state to simulate a restart.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use connector::{
    CreatedRecord, DestinationClient, DestinationRecord, RateLimitedExecutor, RemovalOutcome, RetryPolicy,
    SourceClient, SourcePage,
};
use migrator::services::{JsonStateStore, MappingTransformer};
use migrator::{IdentityIndex, Migrator, MigratorOptions, ProgressSink, StateStore};
use shared::{
    ApiFailure, BatchConfig, DestinationId, DestinationRef, EntityRef, EntityType, FilterCriteria, ProgressSnapshot,
    SourceId, SourceRecord,
};

use super::fixtures::TestFixtures;

#[derive(Default)]
pub struct SourceData {
    pub leads: Vec<SourceRecord>,
    pub records: HashMap<(EntityType, SourceId), SourceRecord>,
    pub children: HashMap<(EntityType, SourceId, EntityType), Vec<SourceRecord>>,
    pub page_limit: usize,
    pub calls: usize,
}

impl SourceData {
    pub fn add_child(&mut self, parent: &EntityRef, child: SourceRecord) {
        self.children
            .entry((parent.entity_type, parent.id.clone(), child.entity_type))
            .or_default()
            .push(child);
    }
}

/// Read-only source holding leads, linked records and children in memory
#[derive(Clone)]
pub struct FakeSource {
    pub data: Arc<Mutex<SourceData>>,
}

impl FakeSource {
    pub fn with_leads(count: usize) -> Self {
        let mut data = SourceData {
            page_limit: 4,
            ..SourceData::default()
        };
        data.leads = TestFixtures::leads(count);
        for n in 0..count {
            let contact = TestFixtures::contact(&format!("c{n}"));
            data.records.insert((EntityType::Contacts, contact.id.clone()), contact);
        }
        let company = TestFixtures::company(TestFixtures::SHARED_COMPANY);
        data.records.insert((EntityType::Companies, company.id.clone()), company);
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn fetch_page(
        &self,
        entity_type: EntityType,
        criteria: &FilterCriteria,
        page: Option<String>,
    ) -> Result<SourcePage, ApiFailure> {
        assert_eq!(entity_type, EntityType::Leads);
        let mut data = self.data.lock().unwrap();
        data.calls += 1;
        let page_index: usize = page.as_deref().unwrap_or("0").parse().unwrap();
        let limit = data.page_limit;
        let matching: Vec<SourceRecord> = data.leads.iter().filter(|l| criteria.matches(l)).cloned().collect();
        let records: Vec<SourceRecord> = matching.into_iter().skip(page_index * limit).take(limit).collect();
        let next_page = (records.len() == limit).then(|| (page_index + 1).to_string());
        Ok(SourcePage { records, next_page })
    }

    async fn fetch_by_ids(&self, entity_type: EntityType, ids: &[SourceId]) -> Result<Vec<SourceRecord>, ApiFailure> {
        let mut data = self.data.lock().unwrap();
        data.calls += 1;
        if entity_type == EntityType::Leads {
            return Ok(ids
                .iter()
                .filter_map(|id| data.leads.iter().find(|l| &l.id == id).cloned())
                .collect());
        }
        Ok(ids
            .iter()
            .filter_map(|id| data.records.get(&(entity_type, id.clone())).cloned())
            .collect())
    }

    async fn fetch_children(&self, parent: &EntityRef, child_type: EntityType) -> Result<Vec<SourceRecord>, ApiFailure> {
        let mut data = self.data.lock().unwrap();
        data.calls += 1;
        Ok(data
            .children
            .get(&(parent.entity_type, parent.id.clone(), child_type))
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveRecord {
    pub source_id: SourceId,
    pub parent: Option<DestinationRef>,
    pub payload: Value,
}

#[derive(Default)]
pub struct DestinationData {
    next_id: u64,
    /// Records currently present (archived records are removed as well)
    pub live: BTreeMap<(EntityType, DestinationId), LiveRecord>,
    /// Every create in call order
    pub created: Vec<(EntityType, SourceId, DestinationId)>,
    pub create_calls: usize,
    pub links: Vec<(DestinationRef, Vec<DestinationRef>)>,
    pub removals: Vec<(EntityType, DestinationId, RemovalOutcome)>,

    /// A create call containing one of these sources is rejected with 400
    pub reject_sources: HashSet<SourceId>,
    /// These sources come back as empty slots inside an accepted call
    pub empty_slot_sources: HashSet<SourceId>,
    /// Every create call for these types is rejected
    pub reject_types: HashSet<EntityType>,
    pub fail_links: bool,
    pub fail_removals: HashSet<DestinationId>,
}

impl DestinationData {
    pub fn live_count(&self, entity_type: EntityType) -> usize {
        self.live.keys().filter(|(t, _)| *t == entity_type).count()
    }

    pub fn created_count(&self, entity_type: EntityType) -> usize {
        self.created.iter().filter(|(t, _, _)| *t == entity_type).count()
    }

    /// Live destination id created for a source record
    pub fn destination_of(&self, entity_type: EntityType, source: &str) -> Option<DestinationId> {
        self.live
            .iter()
            .find(|((t, _), r)| *t == entity_type && r.source_id.as_str() == source)
            .map(|((_, id), _)| id.clone())
    }
}

/// Destination that assigns sequential ids and supports failure injection
#[derive(Clone, Default)]
pub struct FakeDestination {
    pub data: Arc<Mutex<DestinationData>>,
}

#[async_trait]
impl DestinationClient for FakeDestination {
    async fn create_batch(
        &self,
        entity_type: EntityType,
        records: &[DestinationRecord],
    ) -> Result<Vec<Option<CreatedRecord>>, ApiFailure> {
        let mut data = self.data.lock().unwrap();
        data.create_calls += 1;
        // Same rule as the HTTP client: one call, one endpoint
        let mut parent_types: Vec<Option<EntityType>> =
            records.iter().map(|r| r.parent.as_ref().map(|p| p.entity_type)).collect();
        parent_types.dedup();
        if parent_types.len() > 1 {
            return Err(ApiFailure::SafetyViolation {
                code: connector::MIXED_CREATE_PATHS_BLOCKED.to_string(),
                operation: format!("create {entity_type} under {} parent types", parent_types.len()),
            });
        }
        if data.reject_types.contains(&entity_type)
            || records.iter().any(|r| data.reject_sources.contains(&r.source_id))
        {
            return Err(ApiFailure::from_status(400, None, "validation failed"));
        }

        let mut slots = Vec::with_capacity(records.len());
        for record in records {
            if data.empty_slot_sources.contains(&record.source_id) {
                slots.push(None);
                continue;
            }
            data.next_id += 1;
            let id = DestinationId::from(1000 + data.next_id);
            data.live.insert(
                (entity_type, id.clone()),
                LiveRecord {
                    source_id: record.source_id.clone(),
                    parent: record.parent.clone(),
                    payload: record.payload.clone(),
                },
            );
            data.created.push((entity_type, record.source_id.clone(), id.clone()));
            slots.push(Some(CreatedRecord::new(id)));
        }
        Ok(slots)
    }

    async fn link_entities(&self, parent: &DestinationRef, children: &[DestinationRef]) -> Result<(), ApiFailure> {
        let mut data = self.data.lock().unwrap();
        if data.fail_links {
            return Err(ApiFailure::from_status(500, None, "link service down"));
        }
        data.links.push((parent.clone(), children.to_vec()));
        Ok(())
    }

    async fn delete_or_archive(
        &self,
        target: &DestinationRef,
        parent: Option<DestinationRef>,
    ) -> Result<RemovalOutcome, ApiFailure> {
        let mut data = self.data.lock().unwrap();
        if data.fail_removals.contains(&target.id) {
            return Err(ApiFailure::from_status(403, None, "forbidden"));
        }
        if target.entity_type == EntityType::Notes && parent.is_none() {
            return Err(ApiFailure::from_status(400, None, "note removal needs its parent"));
        }
        if data.live.remove(&(target.entity_type, target.id.clone())).is_none() {
            return Err(ApiFailure::NotFound);
        }
        let outcome = match target.entity_type {
            EntityType::Leads | EntityType::Tasks => RemovalOutcome::Archived,
            _ => RemovalOutcome::Deleted,
        };
        data.removals.push((target.entity_type, target.id.clone(), outcome));
        Ok(outcome)
    }
}

/// Keeps every snapshot for later assertions
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub snapshots: Arc<Mutex<Vec<ProgressSnapshot>>>,
}

impl ProgressSink for RecordingSink {
    fn publish(&self, snapshot: &ProgressSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }
}

pub type TestMigrator = Migrator<FakeSource, FakeDestination, MappingTransformer, RecordingSink, JsonStateStore>;

/// Builder for a migrator over in-memory stores and a temporary state directory
pub struct MigratorBuilder {
    leads: usize,
    page_size: usize,
    chunk_size: usize,
    mapped: bool,
    source_setup: Vec<Box<dyn FnOnce(&mut SourceData)>>,
    destination_setup: Vec<Box<dyn FnOnce(&mut DestinationData)>>,
}

impl MigratorBuilder {
    pub fn new() -> Self {
        Self {
            leads: TestFixtures::ELIGIBLE,
            page_size: TestFixtures::PAGE_SIZE,
            chunk_size: 50,
            mapped: true,
            source_setup: Vec::new(),
            destination_setup: Vec::new(),
        }
    }

    pub fn with_leads(mut self, count: usize) -> Self {
        self.leads = count;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Leave stage and field mapping documents absent
    pub fn without_mappings(mut self) -> Self {
        self.mapped = false;
        self
    }

    pub fn with_source<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut SourceData) + 'static,
    {
        self.source_setup.push(Box::new(setup));
        self
    }

    pub fn with_destination<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut DestinationData) + 'static,
    {
        self.destination_setup.push(Box::new(setup));
        self
    }

    pub async fn build(self) -> TestHarness {
        let source = FakeSource::with_leads(self.leads);
        for setup in self.source_setup {
            setup(&mut *source.data.lock().unwrap());
        }
        let destination = FakeDestination::default();
        for setup in self.destination_setup {
            setup(&mut *destination.data.lock().unwrap());
        }

        let harness = TestHarness {
            dir: TempDir::new().unwrap(),
            source,
            destination,
            sink: RecordingSink::default(),
            options: MigratorOptions {
                create_chunk_size: self.chunk_size,
                ..MigratorOptions::default()
            },
        };

        let store = harness.store();
        store
            .save_batch_config(&BatchConfig {
                page_size: self.page_size,
                ..BatchConfig::default()
            })
            .await
            .unwrap();
        if self.mapped {
            store
                .save_stage_mapping(&BTreeMap::from([(
                    TestFixtures::STAGE.to_string(),
                    TestFixtures::MAPPED_STAGE.to_string(),
                )]))
                .await
                .unwrap();
            store
                .save_field_mapping(&BTreeMap::from([(
                    EntityType::Leads,
                    BTreeMap::from([("11".to_string(), "511".to_string())]),
                )]))
                .await
                .unwrap();
        }
        harness
    }
}

pub struct TestHarness {
    pub dir: TempDir,
    pub source: FakeSource,
    pub destination: FakeDestination,
    pub sink: RecordingSink,
    pub options: MigratorOptions,
}

impl TestHarness {
    pub fn store(&self) -> JsonStateStore {
        JsonStateStore::new(self.dir.path())
    }

    /// A fresh migrator over the same stores, as after a process restart
    pub fn migrator(&self) -> TestMigrator {
        Migrator::new(
            self.source.clone(),
            self.destination.clone(),
            MappingTransformer::new(),
            self.sink.clone(),
            self.store(),
            Arc::new(RateLimitedExecutor::new("source", RetryPolicy::immediate())),
            Arc::new(RateLimitedExecutor::new("destination", RetryPolicy::immediate())),
        )
        .with_options(self.options.clone())
    }

    pub fn destination(&self) -> std::sync::MutexGuard<'_, DestinationData> {
        self.destination.data.lock().unwrap()
    }

    pub fn source(&self) -> std::sync::MutexGuard<'_, SourceData> {
        self.source.data.lock().unwrap()
    }

    pub async fn index(&self) -> IdentityIndex {
        self.store().load_index().await.unwrap()
    }

    pub async fn config(&self) -> BatchConfig {
        self.store().load_batch_config().await.unwrap()
    }

    pub async fn set_offset(&self, offset: usize) {
        let store = self.store();
        let mut config = store.load_batch_config().await.unwrap();
        config.offset = offset;
        store.save_batch_config(&config).await.unwrap();
    }
}

/// Assertion helpers
pub struct TestHelpers;

impl TestHelpers {
    pub fn has_warning(run: &shared::RunState, needle: &str) -> bool {
        run.warnings.iter().any(|w| w.message.contains(needle))
    }

    pub fn lead_source(n: usize) -> SourceId {
        SourceId::from(format!("L{n}"))
    }
}
