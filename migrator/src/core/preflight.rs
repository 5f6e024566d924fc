//! Slice selection and non-blocking checks run before anything is created

use serde::{Deserialize, Serialize};
use shared::{BatchConfig, EntityType, FieldMapping, Issue, SourceRecord, StageMapping};

/// Stage and field lookup tables consumed by the transformer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mappings {
    #[serde(default)]
    pub stages: Option<StageMapping>,
    #[serde(default)]
    pub fields: Option<FieldMapping>,
}

impl Mappings {
    pub fn stage_for(&self, source_stage: &str) -> Option<&String> {
        self.stages.as_ref()?.get(source_stage)
    }

    pub fn field_for(&self, entity_type: EntityType, source_field: &str) -> Option<&String> {
        self.fields.as_ref()?.get(&entity_type)?.get(source_field)
    }
}

/// The part of the eligible set one run works on
#[derive(Debug, Clone, PartialEq)]
pub enum BatchSlice {
    /// Filter criteria matched nothing
    NothingEligible,
    /// Offset already at or past the end of the eligible set
    Exhausted { total_eligible: usize, offset: usize },
    Records {
        from: usize,
        to: usize,
        total_eligible: usize,
        records: Vec<SourceRecord>,
    },
}

pub fn select_slice(mut eligible: Vec<SourceRecord>, config: &BatchConfig) -> BatchSlice {
    let total_eligible = eligible.len();
    if total_eligible == 0 {
        return BatchSlice::NothingEligible;
    }
    let (from, to) = config.slice_bounds(total_eligible);
    if from == to {
        return BatchSlice::Exhausted {
            total_eligible,
            offset: config.offset,
        };
    }
    eligible.truncate(to);
    let records = eligible.split_off(from);
    BatchSlice::Records {
        from,
        to,
        total_eligible,
        records,
    }
}

impl BatchSlice {
    /// Completion warning for a slice with nothing to do
    pub fn empty_warning(&self) -> Option<Issue> {
        match self {
            Self::NothingEligible => Some(
                Issue::new("No records match the filter criteria")
                    .with_recommendation("Select other owners or refresh the source data"),
            ),
            Self::Exhausted { total_eligible, offset } => Some(
                Issue::new(format!(
                    "All {total_eligible} eligible records were already processed (offset {offset})"
                ))
                .with_recommendation("Reset the offset to start a new cycle"),
            ),
            Self::Records { .. } => None,
        }
    }
}

/// Warnings about mapping gaps and unlinked leads. None of them block the run.
pub fn preflight_warnings(leads: &[SourceRecord], mappings: &Mappings, terminal_stage_ids: &[String]) -> Vec<Issue> {
    let mut warnings = Vec::new();

    match &mappings.stages {
        None => warnings.push(
            Issue::new("Stage mapping is missing; lead stages will be left at the destination default")
                .with_recommendation("Run stage sync before transferring"),
        ),
        Some(stages) if stages.is_empty() => warnings.push(
            Issue::new("Stage mapping is empty; lead stages will be left at the destination default")
                .with_recommendation("Run stage sync before transferring"),
        ),
        Some(stages) => {
            let mut unmapped: Vec<&str> = leads
                .iter()
                .filter_map(|lead| lead.stage_id.as_deref())
                .filter(|stage| !terminal_stage_ids.iter().any(|t| t == stage))
                .filter(|stage| !stages.contains_key(*stage))
                .collect();
            unmapped.sort_unstable();
            unmapped.dedup();
            if !unmapped.is_empty() {
                warnings.push(
                    Issue::new(format!("Unmapped lead stages: {}", unmapped.join(", ")))
                        .with_recommendation("Map these stages or the leads will land in the default stage"),
                );
            }
        }
    }

    if mappings.fields.as_ref().map_or(true, |f| f.is_empty()) {
        warnings.push(
            Issue::new("Field mapping is missing; custom fields will not be transferred")
                .with_recommendation("Run field sync before transferring"),
        );
    }

    let unlinked = leads
        .iter()
        .filter(|lead| lead.linked(EntityType::Contacts).next().is_none())
        .count();
    if unlinked > 0 {
        warnings.push(Issue::new(format!(
            "{unlinked} of {} leads have no linked contacts and will be transferred without them",
            leads.len()
        )));
    }

    warnings
}
