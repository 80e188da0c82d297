//! Control operations: thin compositions over the store. See spec.md
//! section 4.6. Grounded in the original `cli.py`'s command bodies, minus
//! its CLI-framework ceremony.

use chrono::Utc;
use queuectl_core::{Job, JobState, JobStore, PutOutcome, QueueError};

/// Inserts a new job. Fills `max_retries` from config when the caller
/// didn't specify it; fails with `InputError` if the id already exists.
pub async fn enqueue(
    store: &dyn JobStore,
    id: String,
    command: String,
    max_retries: Option<u32>,
) -> Result<Job, QueueError> {
    let config = store.get_config().await.map_err(QueueError::Store)?;
    let max_retries = max_retries.unwrap_or(config.max_retries);
    let now = Utc::now();
    let job = Job::new(id.clone(), command, max_retries, now);

    match store.put(&job, true).await.map_err(QueueError::Store)? {
        PutOutcome::Inserted => Ok(job),
        PutOutcome::AlreadyExists => Err(QueueError::InputError(format!(
            "Job with ID '{id}' already exists"
        ))),
    }
}

/// Lists jobs, optionally filtered by state, capped at `limit`.
pub async fn list(
    store: &dyn JobStore,
    state: Option<JobState>,
    limit: usize,
) -> Result<Vec<Job>, QueueError> {
    let mut jobs = match state {
        Some(state) => store.list_by_state(state).await.map_err(QueueError::Store)?,
        None => store.list_all().await.map_err(QueueError::Store)?,
    };
    jobs.truncate(limit);
    Ok(jobs)
}

pub async fn get(store: &dyn JobStore, id: &str) -> Result<Job, QueueError> {
    store
        .get(id)
        .await
        .map_err(QueueError::Store)?
        .ok_or_else(|| QueueError::NotFound(id.to_string()))
}

/// Moves a DLQ job back to `pending`. Fails with `InputError` if the job
/// isn't currently `dead` (P7).
pub async fn dlq_retry(
    store: &dyn JobStore,
    id: &str,
    reset_attempts: bool,
) -> Result<Job, QueueError> {
    let mut job = get(store, id).await?;

    if job.state != JobState::Dead {
        return Err(QueueError::InputError(format!(
            "Job '{id}' is not in DLQ (current state: {})",
            job.state.as_str()
        )));
    }

    job.state = JobState::Pending;
    job.error_message = None;
    job.next_retry_at = None;
    job.updated_at = Utc::now();
    if reset_attempts {
        job.attempts = 0;
    }

    store.put(&job, false).await.map_err(QueueError::Store)?;
    Ok(job)
}

/// Deletes all DLQ (`dead`-state) jobs. Returns the count removed.
pub async fn dlq_clear(store: &dyn JobStore) -> Result<u64, QueueError> {
    store
        .delete_all(Some(JobState::Dead))
        .await
        .map_err(QueueError::Store)
}

/// Deletes jobs, all or filtered by state. Returns the count removed.
pub async fn clear(store: &dyn JobStore, state: Option<JobState>) -> Result<u64, QueueError> {
    store.delete_all(state).await.map_err(QueueError::Store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuectl_sqlite::SqliteStore;

    async fn temp_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queuectl.db");
        let store = SqliteStore::connect(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn enqueue_fills_default_max_retries() {
        let (store, _dir) = temp_store().await;
        let job = enqueue(&store, "j1".into(), "echo hi".into(), None)
            .await
            .unwrap();
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.state, JobState::Pending);
    }

    #[tokio::test]
    async fn enqueue_duplicate_id_is_input_error_and_does_not_mutate() {
        let (store, _dir) = temp_store().await;
        enqueue(&store, "j1".into(), "echo hi".into(), None)
            .await
            .unwrap();

        let err = enqueue(&store, "j1".into(), "echo bye".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InputError(_)));

        let stored = get(&store, "j1").await.unwrap();
        assert_eq!(stored.command, "echo hi");
    }

    #[tokio::test]
    async fn dlq_retry_rejects_non_dead_job() {
        let (store, _dir) = temp_store().await;
        enqueue(&store, "j1".into(), "echo hi".into(), None)
            .await
            .unwrap();

        let err = dlq_retry(&store, "j1", false).await.unwrap_err();
        assert!(matches!(err, QueueError::InputError(_)));
    }

    #[tokio::test]
    async fn dlq_retry_resets_state_and_optionally_attempts() {
        let (store, _dir) = temp_store().await;
        let mut job = enqueue(&store, "j1".into(), "false".into(), Some(1))
            .await
            .unwrap();
        job.state = JobState::Dead;
        job.attempts = 1;
        job.error_message = Some("boom".into());
        store.put(&job, false).await.unwrap();

        let retried = dlq_retry(&store, "j1", true).await.unwrap();
        assert_eq!(retried.state, JobState::Pending);
        assert_eq!(retried.attempts, 0);
        assert!(retried.error_message.is_none());
        assert!(retried.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn get_missing_job_is_not_found() {
        let (store, _dir) = temp_store().await;
        let err = get(&store, "missing").await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }
}
