//! Per-step results merged into the run summary

use shared::{EntityType, Issue, RunState};

/// What one entity-type step did. Dependent-entity failures end up here as
/// warnings; root-entity failures are returned as errors instead.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub entity_type: EntityType,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub warnings: Vec<Issue>,
}

impl StepOutcome {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            created: 0,
            skipped: 0,
            failed: 0,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, issue: Issue) {
        self.warnings.push(issue);
    }

    pub fn absorb(&mut self, other: StepOutcome) {
        self.created += other.created;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.warnings.extend(other.warnings);
    }

    /// Add counts to the run statistics and move warnings into the run
    pub fn merge_into(self, run: &mut RunState) {
        let counts = run.stats.counts_mut(self.entity_type);
        counts.created += self.created;
        counts.skipped += self.skipped;
        counts.failed += self.failed;
        run.warnings.extend(self.warnings);
    }
}
