//! The `JobStore` trait: the single contract the rest of the system is
//! built against. See spec.md section 4.1.
//!
//! Any backing technology that provides a serializable write transaction
//! satisfies this contract; the trait mandates behavior, not mechanism. The
//! `queuectl-sqlite` crate is the sole implementation shipped here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::model::{Config, Job, JobState};

/// Counts of jobs grouped by state, as returned by `counts_by_state`.
pub type StateCounts = BTreeMap<JobState, u64>;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically selects and leases one eligible job, or `None` if none is
    /// leasable right now. See spec.md section 4.1 for the selection policy
    /// and the atomicity requirement across steps 3-4.
    async fn acquire_next(&self, worker_id: &str, now: DateTime<Utc>) -> anyhow::Result<Option<Job>>;

    /// Upserts a job. `expect_absent` mirrors the original's existence check
    /// in `enqueue`: when `true`, the call fails if a record with the same
    /// id already exists (used to implement enqueue's uniqueness, I5).
    async fn put(&self, job: &Job, expect_absent: bool) -> anyhow::Result<PutOutcome>;

    async fn get(&self, id: &str) -> anyhow::Result<Option<Job>>;

    async fn list_all(&self) -> anyhow::Result<Vec<Job>>;

    async fn list_by_state(&self, state: JobState) -> anyhow::Result<Vec<Job>>;

    async fn counts_by_state(&self) -> anyhow::Result<StateCounts>;

    /// Clears `lease_owner`/`lease_expires_at` without changing `state`.
    /// Idempotent. Used on worker shutdown and crash-recovery paths.
    async fn release(&self, id: &str) -> anyhow::Result<()>;

    async fn delete(&self, id: &str) -> anyhow::Result<()>;

    /// Deletes every job, or every job in `state` when given. Returns the
    /// number of rows removed.
    async fn delete_all(&self, state: Option<JobState>) -> anyhow::Result<u64>;

    async fn get_config(&self) -> anyhow::Result<Config>;

    async fn put_config(&self, config: &Config) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    AlreadyExists,
}
