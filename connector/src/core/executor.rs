//! Paced, retrying executor for one remote system
//!
//! Every request to a remote system goes through a single executor instance.
//! Callers queue on a FIFO gate that enforces the minimum dispatch interval,
//! and a rate-limit response pauses the gate for every caller, not just the
//! one that received it.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use shared::{component_debug, component_error, component_warn, ApiFailure};
use super::policy::{RetryDecision, RetryPolicy};

#[derive(Debug, Default)]
struct PacingGate {
    last_dispatch: Option<Instant>,
    paused_until: Option<Instant>,
}

pub struct RateLimitedExecutor {
    component: String,
    policy: RetryPolicy,
    gate: Mutex<PacingGate>,
}

impl RateLimitedExecutor {
    /// Create an executor for the named remote system (used in log fields)
    pub fn new(system: &str, policy: RetryPolicy) -> Self {
        Self {
            component: format!("executor:{system}"),
            policy,
            gate: Mutex::new(PacingGate::default()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` under the pacing gate, retrying per the policy.
    ///
    /// `operation` is invoked once per attempt and must be safe to repeat.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, ApiFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiFailure>>,
    {
        let mut transient_failures: u32 = 0;

        loop {
            self.wait_for_turn().await;

            let failure = match operation().await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            let attempt = transient_failures + 1;
            match self.policy.decide(&failure, attempt) {
                RetryDecision::Pause(delay) => {
                    component_warn!(
                        self.component,
                        label = %label,
                        status = 429u16,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, pausing all requests"
                    );
                    self.pause_for(delay).await;
                }
                RetryDecision::Backoff(delay) => {
                    transient_failures = attempt;
                    component_warn!(
                        self.component,
                        label = %label,
                        attempt = attempt,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        status = ?failure.status(),
                        "Transient failure ({}), backing off",
                        failure
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Fail => {
                    component_error!(
                        self.component,
                        label = %label,
                        attempt = attempt,
                        status = ?failure.status(),
                        "Request failed: {}",
                        failure
                    );
                    return Err(failure);
                }
            }
        }
    }

    /// Wait until both the pacing interval and any global pause have elapsed,
    /// then claim the dispatch slot
    async fn wait_for_turn(&self) {
        let mut gate = self.gate.lock().await;

        let now = Instant::now();
        let mut ready_at = now;
        if let Some(last) = gate.last_dispatch {
            ready_at = ready_at.max(last + self.policy.min_interval);
        }
        if let Some(until) = gate.paused_until {
            ready_at = ready_at.max(until);
        }

        if ready_at > now {
            component_debug!(
                self.component,
                wait_ms = (ready_at - now).as_millis() as u64,
                "Waiting for dispatch slot"
            );
            tokio::time::sleep_until(ready_at).await;
        }

        gate.last_dispatch = Some(Instant::now());
    }

    async fn pause_for(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut gate = self.gate.lock().await;
        gate.paused_until = Some(match gate.paused_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }
}
