//! Batch orchestrator
//!
//! Drives one slice of the eligible lead set through the destination in
//! dependency order: companies, contacts, leads, links, tasks, notes. Every
//! remote call goes through the per-system rate-limited executor, and every
//! confirmed create is registered in the identity index before anything else
//! is sent.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use shared::{
    component_debug, component_info, component_warn, logging, ApiFailure, BatchConfig, DestinationRef, EntityRef,
    EntityType, FilterCriteria, Issue, Progress, RunState, RunStatus, SourceId, SourceRecord,
};

use connector::{DestinationClient, DestinationRecord, RateLimitedExecutor, SourceClient};

use crate::core::{
    preflight_warnings, select_slice, BatchSlice, BlockedAttemptLog, IdentityIndex, Mappings, StepOutcome,
};
use crate::error::{recommend_for, MigratorError, MigratorResult};
use crate::traits::{ProgressSink, RecordTransformer, StateStore};

pub(crate) const COMPONENT: &str = "migrator";

/// Tunables that do not come from persisted state
#[derive(Debug, Clone, PartialEq)]
pub struct MigratorOptions {
    /// Records per destination create call
    pub create_chunk_size: usize,
    /// Won/lost stages that never need a stage mapping
    pub terminal_stage_ids: Vec<String>,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            create_chunk_size: 50,
            terminal_stage_ids: vec!["142".to_string(), "143".to_string()],
        }
    }
}

/// Persisted state loaded once per run
pub(crate) struct RunContext {
    pub index: IdentityIndex,
    pub blocked: BlockedAttemptLog,
    pub config: BatchConfig,
    pub mappings: Mappings,
}

/// A source record on its way to the destination
struct PendingRecord {
    record: SourceRecord,
    parent: Option<DestinationRef>,
}

/// Main orchestrator, generic over its collaborators
pub struct Migrator<S, D, T, P, St>
where
    S: SourceClient + 'static,
    D: DestinationClient + 'static,
    T: RecordTransformer + 'static,
    P: ProgressSink + 'static,
    St: StateStore + 'static,
{
    pub(crate) source: S,
    pub(crate) destination: D,
    pub(crate) transformer: T,
    pub(crate) progress: P,
    pub(crate) store: St,

    /// One executor per remote system; all calls to it funnel through here
    pub(crate) source_executor: Arc<RateLimitedExecutor>,
    pub(crate) destination_executor: Arc<RateLimitedExecutor>,

    pub(crate) options: MigratorOptions,
}

impl<S, D, T, P, St> Migrator<S, D, T, P, St>
where
    S: SourceClient + 'static,
    D: DestinationClient + 'static,
    T: RecordTransformer + 'static,
    P: ProgressSink + 'static,
    St: StateStore + 'static,
{
    pub fn new(
        source: S,
        destination: D,
        transformer: T,
        progress: P,
        store: St,
        source_executor: Arc<RateLimitedExecutor>,
        destination_executor: Arc<RateLimitedExecutor>,
    ) -> Self {
        Self {
            source,
            destination,
            transformer,
            progress,
            store,
            source_executor,
            destination_executor,
            options: MigratorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MigratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Transfer the next slice of the eligible set.
    ///
    /// Returns the final run state; a fatal failure ends the run in `error`
    /// with the offset untouched rather than as an `Err`. `Err` is reserved
    /// for failures before the run started (lock held, unreadable state).
    pub async fn start_batch(&self) -> MigratorResult<RunState> {
        let mut run = RunState::start();
        self.store.acquire_run_lock(run.run_id).await?;
        logging::log_startup(COMPONENT, &format!("batch run {}", run.run_id));

        let mut ctx = match self.load_context().await {
            Ok(ctx) => ctx,
            Err(e) => {
                self.release_lock().await;
                return Err(e);
            }
        };

        let result = self.run_steps(&mut run, &mut ctx).await;
        self.finish(&mut run, result).await;
        self.release_lock().await;
        Ok(run)
    }

    pub(crate) async fn load_context(&self) -> MigratorResult<RunContext> {
        Ok(RunContext {
            index: self.store.load_index().await?,
            blocked: self.store.load_blocked().await?,
            config: self.store.load_batch_config().await?,
            mappings: self.store.load_mappings().await?,
        })
    }

    pub(crate) async fn release_lock(&self) {
        if let Err(e) = self.store.release_run_lock().await {
            logging::log_error(COMPONENT, "Failed to release run lock", &e);
        }
    }

    async fn run_steps(&self, run: &mut RunState, ctx: &mut RunContext) -> MigratorResult<()> {
        self.enter_step(run, "resolve eligible set");
        let eligible = self.collect_eligible(&ctx.config.filter).await?;
        let offset = ctx.config.offset;

        let (from, to, leads) = match select_slice(eligible, &ctx.config) {
            BatchSlice::Records {
                from,
                to,
                total_eligible,
                records,
            } => {
                record_totals(run, total_eligible, offset);
                (from, to, records)
            }
            empty => {
                if let BatchSlice::Exhausted { total_eligible, .. } = &empty {
                    record_totals(run, *total_eligible, offset);
                }
                if let Some(warning) = empty.empty_warning() {
                    component_info!(COMPONENT, "Nothing to transfer: {}", warning.message);
                    run.warnings.push(warning);
                }
                return Ok(());
            }
        };

        component_info!(COMPONENT, from, to, "Processing slice of {} leads", leads.len());
        self.migrate_slice(run, ctx, &leads).await?;

        // Index is already durable; the offset is written last
        self.enter_step(run, "advance offset");
        let attempted = to - from;
        ctx.config.offset = ctx.config.offset.saturating_add(attempted);
        self.store.save_batch_config(&ctx.config).await?;
        run.offset_advanced_by = attempted;
        let total_eligible = run.stats.total_eligible;
        record_totals(run, total_eligible, ctx.config.offset);
        component_info!(COMPONENT, offset = ctx.config.offset, "Offset advanced by {}", attempted);
        Ok(())
    }

    /// Companies, contacts, leads, links, tasks and notes for `leads`, in that order
    pub(crate) async fn migrate_slice(
        &self,
        run: &mut RunState,
        ctx: &mut RunContext,
        leads: &[SourceRecord],
    ) -> MigratorResult<()> {
        run.progress = Progress {
            current: 0,
            total: leads.len(),
        };
        run.warnings
            .extend(preflight_warnings(leads, &ctx.mappings, &self.options.terminal_stage_ids));
        self.checkpoint(run).await?;

        self.enter_step(run, "migrate companies");
        let companies = self.fetch_linked(run, leads, EntityType::Companies).await?;
        let outcome = self.migrate_entities(run, ctx, EntityType::Companies, pending(companies)).await?;
        outcome.merge_into(run);
        self.checkpoint(run).await?;

        self.enter_step(run, "migrate contacts");
        let contacts = self.fetch_linked(run, leads, EntityType::Contacts).await?;
        let contact_refs: Vec<EntityRef> = contacts
            .iter()
            .map(|c| EntityRef::new(EntityType::Contacts, c.id.clone()))
            .collect();
        let outcome = self.migrate_entities(run, ctx, EntityType::Contacts, pending(contacts)).await?;
        outcome.merge_into(run);
        self.checkpoint(run).await?;

        self.enter_step(run, "migrate leads");
        let outcome = self
            .migrate_entities(run, ctx, EntityType::Leads, pending(leads.to_vec()))
            .await?;
        outcome.merge_into(run);
        run.progress.current = run.progress.total;
        self.checkpoint(run).await?;

        self.enter_step(run, "link leads");
        let warnings = self.link_leads(ctx, leads).await;
        run.warnings.extend(warnings);
        self.checkpoint(run).await?;

        let lead_refs: Vec<EntityRef> = leads
            .iter()
            .map(|l| EntityRef::new(EntityType::Leads, l.id.clone()))
            .collect();

        self.enter_step(run, "migrate tasks");
        let outcome = self.migrate_dependents(run, ctx, EntityType::Tasks, &lead_refs).await?;
        outcome.merge_into(run);
        self.checkpoint(run).await?;

        self.enter_step(run, "migrate notes");
        let note_parents: Vec<EntityRef> = lead_refs.iter().chain(contact_refs.iter()).cloned().collect();
        let outcome = self.migrate_dependents(run, ctx, EntityType::Notes, &note_parents).await?;
        outcome.merge_into(run);
        self.checkpoint(run).await
    }

    /// Every eligible lead, in source order
    pub(crate) async fn collect_eligible(&self, criteria: &FilterCriteria) -> MigratorResult<Vec<SourceRecord>> {
        let mut eligible = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .source_executor
                .execute("fetch leads page", || {
                    self.source.fetch_page(EntityType::Leads, criteria, page_token.clone())
                })
                .await
                .map_err(|failure| root_failure(EntityType::Leads, failure))?;
            eligible.extend(page.records.into_iter().filter(|r| criteria.matches(r)));
            match page.next_page {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        component_debug!(COMPONENT, "Resolved {} eligible leads", eligible.len());
        Ok(eligible)
    }

    /// Source records of `entity_type` linked from the slice, deduplicated
    async fn fetch_linked(
        &self,
        run: &mut RunState,
        leads: &[SourceRecord],
        entity_type: EntityType,
    ) -> MigratorResult<Vec<SourceRecord>> {
        let mut seen = HashSet::new();
        let ids: Vec<SourceId> = leads
            .iter()
            .flat_map(|lead| lead.linked(entity_type))
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let label = format!("fetch linked {entity_type}");
        let records = self
            .source_executor
            .execute(&label, || self.source.fetch_by_ids(entity_type, &ids))
            .await
            .map_err(|failure| root_failure(entity_type, failure))?;

        if records.len() < ids.len() {
            run.warnings.push(Issue::new(format!(
                "{} of {} linked {entity_type} were not found in the source",
                ids.len() - records.len(),
                ids.len()
            )));
        }
        Ok(records)
    }

    /// Skip known records, create the rest chunk by chunk.
    ///
    /// Confirmed ids are registered and persisted per chunk. Root types fail
    /// the run on a rejected call; dependent types degrade to warnings.
    async fn migrate_entities(
        &self,
        run: &mut RunState,
        ctx: &mut RunContext,
        entity_type: EntityType,
        items: Vec<PendingRecord>,
    ) -> MigratorResult<StepOutcome> {
        let mut outcome = StepOutcome::new(entity_type);
        if items.is_empty() {
            return Ok(outcome);
        }

        let partition = ctx
            .index
            .filter_not_migrated(entity_type, items, |p| &p.record.id, &mut ctx.blocked);
        outcome.skipped = partition.skipped.len();
        if outcome.skipped > 0 {
            component_info!(
                COMPONENT,
                entity_type = %entity_type,
                "Skipping {} records transferred earlier",
                outcome.skipped
            );
        }

        let mut records: Vec<DestinationRecord> = partition
            .to_create
            .into_iter()
            .map(|p| {
                let transformed = self.transformer.transform(&p.record, &ctx.mappings);
                outcome.warnings.extend(transformed.warnings);
                DestinationRecord {
                    source_id: p.record.id,
                    entity_type,
                    parent: p.parent,
                    payload: transformed.payload,
                }
            })
            .collect();

        // Each create call is a single remote write, so a chunk never spans parent types
        records.sort_by_key(parent_type);
        let chunk_size = self.options.create_chunk_size.max(1);
        let chunks = records
            .chunk_by(|a, b| parent_type(a) == parent_type(b))
            .flat_map(|group| group.chunks(chunk_size));

        let label = format!("create {entity_type}");
        for chunk in chunks {
            let slots = match self
                .destination_executor
                .execute(&label, || self.destination.create_batch(entity_type, chunk))
                .await
            {
                Ok(slots) => slots,
                Err(failure) if entity_type.is_root() || is_safety(&failure) => {
                    self.persist_index(ctx).await?;
                    return Err(root_failure(entity_type, failure));
                }
                Err(failure) => {
                    outcome.failed += chunk.len();
                    outcome.warn(Issue::new(format!(
                        "{} {entity_type} could not be created: {failure}",
                        chunk.len()
                    )));
                    continue;
                }
            };

            let mut confirmed = Vec::new();
            let mut rejected = Vec::new();
            for (i, record) in chunk.iter().enumerate() {
                match slots.get(i).cloned().flatten() {
                    Some(created) => confirmed.push((record, created.id)),
                    None => rejected.push(record.source_id.clone()),
                }
            }

            let pairs: Vec<_> = confirmed
                .iter()
                .map(|(record, id)| (record.source_id.clone(), id.clone()))
                .collect();
            let registration = ctx.index.register_migrated_batch(entity_type, &pairs, &mut ctx.blocked);

            // Ledger only what the index accepted
            for (record, id) in &confirmed {
                if ctx.index.lookup(entity_type, &record.source_id) == Some(id) {
                    run.created
                        .record(entity_type, record.source_id.clone(), id.clone(), record.parent.clone());
                    outcome.created += 1;
                }
            }
            self.persist_index(ctx).await?;
            self.store.save_last_run(run).await?;
            registration?;

            if entity_type == EntityType::Leads {
                run.progress.current += chunk.len();
            }

            if !rejected.is_empty() {
                let ids: Vec<&str> = rejected.iter().map(SourceId::as_str).collect();
                let failure = ApiFailure::InvalidResponse(format!(
                    "destination returned no id for {entity_type} {}",
                    ids.join(", ")
                ));
                if entity_type == EntityType::Leads {
                    return Err(root_failure(entity_type, failure));
                }
                outcome.failed += rejected.len();
                outcome.warn(Issue::new(failure.to_string()));
            }
        }

        component_info!(
            COMPONENT,
            entity_type = %entity_type,
            created = outcome.created,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "Step finished"
        );
        Ok(outcome)
    }

    /// Link every slice lead that exists in the destination to its contacts and
    /// companies. Leads skipped as already transferred are relinked too, so an
    /// interrupted earlier run still ends up linked.
    async fn link_leads(&self, ctx: &RunContext, leads: &[SourceRecord]) -> Vec<Issue> {
        let mut warnings = Vec::new();
        let mut linked = 0usize;

        for lead in leads {
            let Some(lead_id) = ctx.index.lookup(EntityType::Leads, &lead.id) else {
                continue;
            };
            let mut targets = Vec::new();
            for link in &lead.links {
                match ctx.index.lookup(link.entity_type, &link.id) {
                    Some(id) => targets.push(DestinationRef::new(link.entity_type, id.clone())),
                    None => warnings.push(Issue::new(format!(
                        "Lead {} not linked to {} {}: it was not transferred",
                        lead.id, link.entity_type, link.id
                    ))),
                }
            }
            if targets.is_empty() {
                continue;
            }

            let parent = DestinationRef::new(EntityType::Leads, lead_id.clone());
            let label = format!("link lead {}", lead.id);
            match self
                .destination_executor
                .execute(&label, || self.destination.link_entities(&parent, &targets))
                .await
            {
                Ok(()) => linked += 1,
                Err(failure) => {
                    component_warn!(COMPONENT, lead = %lead.id, "Linking failed: {}", failure);
                    warnings.push(
                        Issue::new(format!("Lead {} could not be linked: {failure}", lead.id))
                            .with_recommendation("Link the lead manually in the destination"),
                    );
                }
            }
        }

        component_info!(COMPONENT, "Linked {} leads", linked);
        warnings
    }

    /// Read children of every migrated parent and create the new ones.
    /// Parents are resolved through the index, so parents transferred by an
    /// earlier run still get their children.
    async fn migrate_dependents(
        &self,
        run: &mut RunState,
        ctx: &mut RunContext,
        child_type: EntityType,
        parents: &[EntityRef],
    ) -> MigratorResult<StepOutcome> {
        let mut outcome = StepOutcome::new(child_type);
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for parent in parents {
            let Some(parent_id) = ctx.index.lookup(parent.entity_type, &parent.id).cloned() else {
                continue;
            };
            let label = format!("fetch {child_type} of {} {}", parent.entity_type, parent.id);
            match self
                .source_executor
                .execute(&label, || self.source.fetch_children(parent, child_type))
                .await
            {
                Ok(children) => {
                    let destination_parent = DestinationRef::new(parent.entity_type, parent_id);
                    items.extend(
                        children
                            .into_iter()
                            .filter(|child| seen.insert(child.id.clone()))
                            .map(|record| PendingRecord {
                                record,
                                parent: Some(destination_parent.clone()),
                            }),
                    );
                }
                Err(failure) if is_safety(&failure) => return Err(root_failure(child_type, failure)),
                Err(failure) => outcome.warn(Issue::new(format!(
                    "Could not read {child_type} of {} {}: {failure}",
                    parent.entity_type, parent.id
                ))),
            }
        }

        let created = self.migrate_entities(run, ctx, child_type, items).await?;
        outcome.absorb(created);
        Ok(outcome)
    }

    pub(crate) fn enter_step(&self, run: &mut RunState, step: &str) {
        run.current_step = Some(step.to_string());
        logging::log_progress(COMPONENT, step, &format!("run {}", run.run_id));
    }

    /// Persist the run summary and notify the progress sink
    pub(crate) async fn checkpoint(&self, run: &RunState) -> MigratorResult<()> {
        self.store.save_last_run(run).await?;
        self.progress.publish(&run.snapshot());
        Ok(())
    }

    pub(crate) async fn persist_index(&self, ctx: &RunContext) -> MigratorResult<()> {
        self.store.save_index(&ctx.index).await?;
        self.store.save_blocked(&ctx.blocked).await
    }

    pub(crate) async fn finish(&self, run: &mut RunState, result: MigratorResult<()>) {
        match result {
            Ok(()) => {
                run.status = RunStatus::Completed;
                logging::log_success(COMPONENT, &format!("Batch run {} completed", run.run_id));
            }
            Err(e) => {
                logging::log_error(COMPONENT, "Batch run failed", &e);
                let mut issue = Issue::new(e.to_string());
                if let Some(hint) = e.recommendation() {
                    issue = issue.with_recommendation(hint);
                }
                run.errors.push(issue);
                run.status = RunStatus::Error;
            }
        }
        run.completed_at = Some(Utc::now());
        if let Err(e) = self.checkpoint(run).await {
            logging::log_error(COMPONENT, "Failed to persist final run state", &e);
        }
    }
}

fn pending(records: Vec<SourceRecord>) -> Vec<PendingRecord> {
    records
        .into_iter()
        .map(|record| PendingRecord { record, parent: None })
        .collect()
}

fn parent_type(record: &DestinationRecord) -> Option<EntityType> {
    record.parent.as_ref().map(|p| p.entity_type)
}

pub(crate) fn root_failure(entity_type: EntityType, failure: ApiFailure) -> MigratorError {
    if let ApiFailure::SafetyViolation { code, operation } = failure {
        return MigratorError::Safety { code, message: operation };
    }
    MigratorError::RootEntityFailed {
        entity_type,
        recommendation: recommend_for(entity_type, &failure),
        failure,
    }
}

fn is_safety(failure: &ApiFailure) -> bool {
    matches!(failure, ApiFailure::SafetyViolation { .. })
}

fn record_totals(run: &mut RunState, total_eligible: usize, offset: usize) {
    run.stats.total_eligible = total_eligible;
    run.stats.total_transferred = offset.min(total_eligible);
    run.stats.remaining = total_eligible.saturating_sub(offset);
}
