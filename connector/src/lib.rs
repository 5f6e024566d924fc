//! Connector library for the CRM migration engine
//!
//! Provides the rate-limited retry executor that every remote call is routed
//! through, the record-store client traits, and their HTTP implementations.

pub mod core;
pub mod error;
pub mod services;
pub mod traits;
pub mod types;

pub use crate::core::{RateLimitedExecutor, RetryDecision, RetryPolicy};
pub use error::{ConnectorError, ConnectorResult};
pub use services::*;
pub use traits::*;
pub use types::*;
