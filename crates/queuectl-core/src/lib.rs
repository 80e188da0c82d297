//! # queuectl-core
//!
//! Data model, error types, scheduling rules, and the `JobStore` contract
//! shared by every other crate in the workspace. This crate has no async
//! runtime dependency of its own beyond the trait signatures in
//! [`store::JobStore`] — it does no I/O.

pub mod error;
pub mod model;
pub mod scheduler;
pub mod store;

pub use error::{Categorizable, QueueError, Result};
pub use model::{format_timestamp, Config, Job, JobState, CONFIG_KEYS};
pub use scheduler::{backoff_delay, classify_failure, FailureOutcome};
pub use store::{JobStore, PutOutcome, StateCounts};
