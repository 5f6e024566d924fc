//! Progress sink that reports run snapshots through tracing

use shared::{component_info, component_warn, ProgressSnapshot};
use std::sync::Mutex;

use crate::traits::ProgressSink;

/// Logs each snapshot, plus warnings and errors added since the previous one
pub struct TracingProgressSink {
    component: String,
    seen: Mutex<(usize, usize)>,
}

impl TracingProgressSink {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            seen: Mutex::new((0, 0)),
        }
    }
}

impl ProgressSink for TracingProgressSink {
    fn publish(&self, snapshot: &ProgressSnapshot) {
        component_info!(
            self.component,
            run_id = %snapshot.run_id,
            status = %snapshot.status,
            current = snapshot.progress.current,
            total = snapshot.progress.total,
            "Step: {}",
            snapshot.step.as_deref().unwrap_or("-")
        );

        let Ok(mut seen) = self.seen.lock() else {
            return;
        };
        let (warnings_seen, errors_seen) = *seen;
        for warning in snapshot.warnings.iter().skip(warnings_seen) {
            component_warn!(self.component, hint = ?warning.recommendation, "Warning: {}", warning.message);
        }
        for error in snapshot.errors.iter().skip(errors_seen) {
            component_warn!(self.component, hint = ?error.recommendation, "Error: {}", error.message);
        }
        *seen = (snapshot.warnings.len(), snapshot.errors.len());
    }
}
