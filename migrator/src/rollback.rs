//! Rollback engine
//!
//! Undoes destination records created by the last run, newest dependents
//! first. Only the run's own ledger decides what may be removed; the identity
//! index is consulted solely to drop the entries that pointed at removed
//! records.

use std::collections::BTreeMap;

use serde::Serialize;
use shared::{
    component_info, component_warn, logging, CreatedEntry, DestinationRef, EntityType, Issue, RunState, RunStatus,
};
use uuid::Uuid;

use connector::{DestinationClient, RemovalOutcome, SourceClient};

use crate::core::validate_rollback_ids;
use crate::error::{MigratorError, MigratorResult};
use crate::migrator::Migrator;
use crate::traits::{ProgressSink, RecordTransformer, StateStore};

const COMPONENT: &str = "rollback";

/// Which part of the last run's ledger to undo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackScope {
    WholeRun,
    /// The newest root record of one type and everything created under it afterwards
    LastRoot(EntityType),
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub run: RunState,
    pub removed: BTreeMap<EntityType, usize>,
    /// Removals done as a state transition instead of a hard delete
    pub archived: usize,
    /// Already gone in the destination
    pub already_absent: usize,
    pub failed: usize,
    pub blocked: usize,
    pub offset_decrement: usize,
}

impl<S, D, T, P, St> Migrator<S, D, T, P, St>
where
    S: SourceClient + 'static,
    D: DestinationClient + 'static,
    T: RecordTransformer + 'static,
    P: ProgressSink + 'static,
    St: StateStore + 'static,
{
    /// Remove everything the last run created
    pub async fn rollback_batch(&self) -> MigratorResult<RollbackReport> {
        self.rollback(RollbackScope::WholeRun).await
    }

    /// Remove the last run's newest `entity_type` record and its dependents
    pub async fn rollback_last(&self, entity_type: EntityType) -> MigratorResult<RollbackReport> {
        if !entity_type.is_root() {
            return Err(MigratorError::configuration(
                "entity_type",
                format!("{entity_type} is not a root entity type"),
            ));
        }
        self.rollback(RollbackScope::LastRoot(entity_type)).await
    }

    async fn rollback(&self, scope: RollbackScope) -> MigratorResult<RollbackReport> {
        self.store.acquire_run_lock(Uuid::new_v4()).await?;
        let result = self.rollback_locked(scope).await;
        self.release_lock().await;
        result
    }

    async fn rollback_locked(&self, scope: RollbackScope) -> MigratorResult<RollbackReport> {
        let mut run = self
            .store
            .load_last_run()
            .await?
            .filter(|run| !run.created.is_empty())
            .ok_or(MigratorError::NothingToRollback)?;
        let mut ctx = self.load_context().await?;

        let targets = scope_targets(&run, scope)?;
        logging::log_startup(
            COMPONENT,
            &format!("{} records of run {} ({:?})", targets.len(), run.run_id, scope),
        );

        run.status = RunStatus::RollingBack;
        run.current_step = Some("rollback".to_string());
        run.errors.clear();
        run.warnings.clear();
        self.checkpoint(&run).await?;

        let mut report = RollbackReport {
            run: RunState::idle(),
            removed: BTreeMap::new(),
            archived: 0,
            already_absent: 0,
            failed: 0,
            blocked: 0,
            offset_decrement: 0,
        };
        let mut roots_removed = 0usize;

        for entity_type in EntityType::ROLLBACK_ORDER {
            let candidates: Vec<_> = targets
                .iter()
                .filter(|e| e.entity_type == entity_type)
                .map(|e| e.destination_id.clone())
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let partition = validate_rollback_ids(entity_type, &candidates, &run.created, &mut ctx.blocked);
            for id in &partition.blocked {
                component_warn!(COMPONENT, entity_type = %entity_type, id = %id, "Not created by this run; left in place");
                run.warnings.push(Issue::new(format!(
                    "Refused to remove {entity_type} {id}: it was not created by the run being rolled back"
                )));
            }
            report.blocked += partition.blocked.len();

            for id in partition.safe {
                let parent = run.created.find(entity_type, &id).and_then(|e| e.parent.clone());
                let target = DestinationRef::new(entity_type, id.clone());
                let label = format!("remove {entity_type} {id}");
                let result = self
                    .destination_executor
                    .execute(&label, || self.destination.delete_or_archive(&target, parent.clone()))
                    .await;

                match result {
                    Ok(outcome) => {
                        if outcome == RemovalOutcome::Archived {
                            report.archived += 1;
                        }
                    }
                    Err(failure) if failure.is_not_found() => {
                        report.already_absent += 1;
                    }
                    Err(failure) => {
                        logging::log_error(COMPONENT, &label, &failure);
                        run.errors.push(
                            Issue::new(format!("Could not remove {entity_type} {id}: {failure}"))
                                .with_recommendation("Remove the record manually in the destination"),
                        );
                        report.failed += 1;
                        continue;
                    }
                }

                ctx.index.remove_destination(entity_type, &id);
                run.created.remove(entity_type, &id);
                *report.removed.entry(entity_type).or_default() += 1;
                if entity_type == EntityType::Leads {
                    roots_removed += 1;
                }
            }

            self.persist_index(&ctx).await?;
            self.store.save_last_run(&run).await?;
        }

        // Index first, then the offset
        let decrement = roots_removed.min(run.offset_advanced_by);
        if decrement > 0 {
            ctx.config.offset = ctx.config.offset.saturating_sub(decrement);
            run.offset_advanced_by -= decrement;
            self.store.save_batch_config(&ctx.config).await?;
        }
        report.offset_decrement = decrement;

        run.status = if report.failed == 0 {
            RunStatus::Idle
        } else {
            RunStatus::Error
        };
        run.current_step = None;
        self.checkpoint(&run).await?;

        component_info!(
            COMPONENT,
            failed = report.failed,
            blocked = report.blocked,
            offset = ctx.config.offset,
            "Rollback finished: {:?}",
            report.removed
        );
        report.run = run;
        Ok(report)
    }
}

fn scope_targets(run: &RunState, scope: RollbackScope) -> MigratorResult<Vec<CreatedEntry>> {
    match scope {
        RollbackScope::WholeRun => Ok(run.created.entries().to_vec()),
        RollbackScope::LastRoot(entity_type) => {
            let root = run
                .created
                .last_of(entity_type)
                .cloned()
                .ok_or(MigratorError::NothingToRollback)?;
            let parent = DestinationRef::new(entity_type, root.destination_id.clone());
            let mut targets = run.created.dependents_of(&parent, root.seq);
            targets.push(root);
            Ok(targets)
        }
    }
}
