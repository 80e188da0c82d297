//! The worker execution loop and job state machine. See spec.md section 4.3.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use queuectl_core::{backoff_delay, classify_failure, FailureOutcome, Job, JobState, JobStore};

use crate::runner::{run_job, RunOutcome};

/// Cooperative cancellation flag. Setting it to `false` causes the next
/// idle poll-sleep suspension point to return and the loop to exit — the
/// Rust analogue of the original's signal-handler-mutated `running` bool
/// (spec.md section 9).
pub type RunningFlag = Arc<AtomicBool>;

pub fn new_running_flag() -> RunningFlag {
    Arc::new(AtomicBool::new(true))
}

pub struct Worker<S: JobStore> {
    worker_id: String,
    store: Arc<S>,
    running: RunningFlag,
}

impl<S: JobStore + 'static> Worker<S> {
    pub fn new(worker_id: String, store: Arc<S>, running: RunningFlag) -> Self {
        Worker {
            worker_id,
            store,
            running,
        }
    }

    /// Runs the loop until `running` is cleared. Mirrors `worker.py`'s
    /// `Worker.start`: reload config, try to acquire a job, execute it or
    /// sleep, repeat; release any held lease on the way out.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(worker_id = %self.worker_id, "worker started");

        let mut held_job_id: Option<String> = None;

        while self.running.load(Ordering::SeqCst) {
            let config = self.store.get_config().await?;
            let now = Utc::now();

            match self.store.acquire_next(&self.worker_id, now).await? {
                Some(job) => {
                    held_job_id = Some(job.id.clone());
                    self.execute(job, config.backoff_base).await?;
                    held_job_id = None;
                }
                None => {
                    tokio::time::sleep(std::time::Duration::from_secs_f64(
                        config.worker_poll_interval.max(0.0),
                    ))
                    .await;
                }
            }
        }

        if let Some(id) = held_job_id {
            self.store.release(&id).await?;
        }

        tracing::info!(worker_id = %self.worker_id, "worker stopped");
        Ok(())
    }

    /// Executes one acquired job and persists the resulting transition.
    /// `attempts` is incremented here, before the subprocess runs, so a
    /// crash mid-attempt is observable afterward as an elevated attempt
    /// count charged against the retry budget.
    async fn execute(&self, mut job: Job, backoff_base: u32) -> anyhow::Result<()> {
        let timeout = {
            let config = self.store.get_config().await?;
            std::time::Duration::from_secs(config.job_timeout)
        };

        job.attempts += 1;
        job.updated_at = Utc::now();
        // Persisted before the subprocess runs, with the job still
        // `processing` under its existing lease, so a crash mid-attempt
        // leaves the bumped count durable rather than losing it — the
        // increment must survive the worker even if the attempt doesn't.
        self.store.put(&job, false).await?;

        tracing::info!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            command = %job.command,
            attempt = job.attempts,
            "executing job"
        );

        let outcome = run_job(&job.command, timeout).await;
        let now = Utc::now();

        match outcome {
            RunOutcome::Success => {
                job.state = JobState::Completed;
                job.error_message = None;
                job.next_retry_at = None;
                job.lease_owner = None;
                job.lease_expires_at = None;
                job.updated_at = now;

                tracing::info!(
                    worker_id = %self.worker_id,
                    job_id = %job.id,
                    attempts = job.attempts,
                    "job completed successfully"
                );
            }
            RunOutcome::Failure(message) => {
                self.apply_failure(&mut job, message, backoff_base, now);
            }
        }

        self.store.put(&job, false).await?;
        self.store.release(&job.id).await?;
        Ok(())
    }

    fn apply_failure(
        &self,
        job: &mut Job,
        message: String,
        backoff_base: u32,
        now: chrono::DateTime<Utc>,
    ) {
        job.error_message = Some(message);
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.updated_at = now;

        match classify_failure(job.attempts, job.max_retries) {
            FailureOutcome::Dead => {
                job.state = JobState::Dead;
                job.next_retry_at = None;
                tracing::warn!(
                    worker_id = %self.worker_id,
                    job_id = %job.id,
                    attempts = job.attempts,
                    error = %job.error_message.as_deref().unwrap_or_default(),
                    "job failed permanently, moved to DLQ"
                );
            }
            FailureOutcome::Retry => {
                job.state = JobState::Failed;
                let delay = backoff_delay(job.attempts, backoff_base);
                job.next_retry_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
                tracing::warn!(
                    worker_id = %self.worker_id,
                    job_id = %job.id,
                    attempt = job.attempts,
                    max_retries = job.max_retries,
                    retry_in_secs = delay.as_secs(),
                    error = %job.error_message.as_deref().unwrap_or_default(),
                    "job failed, scheduled for retry"
                );
            }
        }
    }
}

/// Signals `flag` to stop on the next poll-sleep suspension point. Wired to
/// SIGTERM/SIGINT in the CLI binary's graceful shutdown path.
pub fn request_stop(flag: &RunningFlag) {
    flag.store(false, Ordering::SeqCst);
}
