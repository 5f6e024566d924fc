//! Connector core logic: pacing and retry

pub mod executor;
pub mod policy;

pub use executor::RateLimitedExecutor;
pub use policy::{RetryDecision, RetryPolicy};
