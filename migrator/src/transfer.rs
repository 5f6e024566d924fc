//! Operator-directed transfers
//!
//! An owner overview to pick the filter from, and transfer of an explicit
//! list of leads outside the batch cursor.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use shared::{
    component_info, component_warn, logging, EntityType, FilterCriteria, Issue, RunState, SourceId, SourceRecord,
};

use connector::{DestinationClient, SourceClient};

use crate::error::{MigratorError, MigratorResult};
use crate::migrator::{root_failure, Migrator};
use crate::traits::{ProgressSink, RecordTransformer, StateStore};

const COMPONENT: &str = "transfer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerCount {
    pub owner_id: String,
    pub lead_count: usize,
}

/// Lead counts per owner across the whole source, busiest owner first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerSummary {
    pub total_leads: usize,
    pub without_owner: usize,
    pub owners: Vec<OwnerCount>,
    /// Owner filter of the batch cursor; empty means every owner
    pub current_owner_ids: Vec<String>,
    /// Leads the current filter selects
    pub eligible: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub requested: usize,
    pub found: usize,
    pub missing: Vec<SourceId>,
    pub run: RunState,
}

pub fn summarize_owners(leads: &[SourceRecord], filter: &FilterCriteria) -> OwnerSummary {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut without_owner = 0;
    for lead in leads {
        match lead.owner_id.as_deref() {
            Some(owner) => *counts.entry(owner).or_default() += 1,
            None => without_owner += 1,
        }
    }

    let mut owners: Vec<OwnerCount> = counts
        .into_iter()
        .map(|(owner_id, lead_count)| OwnerCount {
            owner_id: owner_id.to_string(),
            lead_count,
        })
        .collect();
    // Stable: ties keep owner id order
    owners.sort_by(|a, b| b.lead_count.cmp(&a.lead_count));

    OwnerSummary {
        total_leads: leads.len(),
        without_owner,
        owners,
        current_owner_ids: filter.owner_ids.clone(),
        eligible: leads.iter().filter(|l| filter.matches(l)).count(),
    }
}

impl<S, D, T, P, St> Migrator<S, D, T, P, St>
where
    S: SourceClient + 'static,
    D: DestinationClient + 'static,
    T: RecordTransformer + 'static,
    P: ProgressSink + 'static,
    St: StateStore + 'static,
{
    /// Read every source lead and count them per owner. Read-only; takes no lock.
    pub async fn owner_summary(&self) -> MigratorResult<OwnerSummary> {
        let config = self.store.load_batch_config().await?;
        let leads = self.collect_eligible(&FilterCriteria::default()).await?;
        let summary = summarize_owners(&leads, &config.filter);
        component_info!(
            COMPONENT,
            total = summary.total_leads,
            eligible = summary.eligible,
            "Counted leads of {} owners",
            summary.owners.len()
        );
        Ok(summary)
    }

    /// Transfer the given leads with their companies, contacts, tasks and notes.
    ///
    /// Ignores the owner filter and leaves the batch offset alone. The run
    /// replaces the last run, so `rollback_batch` undoes it. Failures before
    /// any record was sent (lock held, unreadable state, unknown ids) are
    /// returned as `Err` and leave the last run untouched.
    pub async fn transfer_leads(&self, ids: &[SourceId]) -> MigratorResult<TransferReport> {
        let mut seen = HashSet::new();
        let ids: Vec<SourceId> = ids.iter().filter(|id| seen.insert((*id).clone())).cloned().collect();
        if ids.is_empty() {
            return Err(MigratorError::configuration("lead", "at least one lead id is required"));
        }

        let run = RunState::start();
        self.store.acquire_run_lock(run.run_id).await?;
        let result = self.transfer_locked(run, &ids).await;
        self.release_lock().await;
        result
    }

    async fn transfer_locked(&self, mut run: RunState, ids: &[SourceId]) -> MigratorResult<TransferReport> {
        let mut ctx = self.load_context().await?;

        let leads: Vec<SourceRecord> = self
            .source_executor
            .execute("fetch requested leads", || self.source.fetch_by_ids(EntityType::Leads, ids))
            .await
            .map_err(|failure| root_failure(EntityType::Leads, failure))?
            .into_iter()
            .filter(|lead| ids.contains(&lead.id))
            .collect();
        if leads.is_empty() {
            return Err(MigratorError::LeadsNotFound { requested: ids.to_vec() });
        }

        let missing: Vec<SourceId> = ids
            .iter()
            .filter(|id| !leads.iter().any(|lead| &lead.id == *id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let listed: Vec<&str> = missing.iter().map(SourceId::as_str).collect();
            component_warn!(COMPONENT, "{} requested leads not found", missing.len());
            run.warnings.push(Issue::new(format!(
                "Requested leads not found in the source: {}",
                listed.join(", ")
            )));
        }

        logging::log_startup(COMPONENT, &format!("transfer of {} leads, run {}", leads.len(), run.run_id));
        let result = self.migrate_slice(&mut run, &mut ctx, &leads).await;
        self.finish(&mut run, result).await;

        Ok(TransferReport {
            requested: ids.len(),
            found: leads.len(),
            missing,
            run,
        })
    }
}
