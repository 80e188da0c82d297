//! SQLite implementation of the `queuectl-core::JobStore` trait.
//!
//! This is the store's sole backing implementation: a single local file
//! holding two tables, `jobs` and `config`. Mutating operations run inside a
//! `BEGIN IMMEDIATE` transaction, which takes SQLite's write lock up front —
//! the single-writer equivalent of the row-level `FOR UPDATE SKIP LOCKED`
//! a multi-writer database like Postgres would use for the same job-queue
//! pattern. Two concurrent `acquire_next` calls serialize against that lock,
//! so they can never observe and claim the same job (spec.md's atomicity
//! requirement across selection and claim).
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id               TEXT PRIMARY KEY,
//!     command          TEXT NOT NULL,
//!     state            TEXT NOT NULL,
//!     attempts         INTEGER NOT NULL,
//!     max_retries      INTEGER NOT NULL,
//!     created_at       TEXT NOT NULL,
//!     updated_at       TEXT NOT NULL,
//!     next_retry_at    TEXT,
//!     error_message    TEXT,
//!     lease_owner      TEXT,
//!     lease_expires_at TEXT
//! );
//!
//! CREATE TABLE config (
//!     id                    INTEGER PRIMARY KEY CHECK (id = 0),
//!     max_retries           INTEGER NOT NULL,
//!     backoff_base          INTEGER NOT NULL,
//!     worker_poll_interval  REAL NOT NULL,
//!     job_timeout           INTEGER NOT NULL
//! );
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use queuectl_sqlite::SqliteStore;
//!
//! let store = SqliteStore::connect("queuectl.db").await?;
//! ```

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use queuectl_core::{Config, Job, JobState, JobStore, PutOutcome, StateCounts};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

/// Grace period added on top of `job_timeout` when computing
/// `lease_expires_at`, so a worker executing a legitimately long job is
/// never preempted by another worker (spec.md section 5).
const LEASE_GRACE: Duration = Duration::seconds(10);

/// SQLite-backed job store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if necessary) the store file at `path` and ensures
    /// its schema exists.
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id               TEXT PRIMARY KEY,
                command          TEXT NOT NULL,
                state            TEXT NOT NULL,
                attempts         INTEGER NOT NULL,
                max_retries      INTEGER NOT NULL,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL,
                next_retry_at    TEXT,
                error_message    TEXT,
                lease_owner      TEXT,
                lease_expires_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                id                   INTEGER PRIMARY KEY CHECK (id = 0),
                max_retries          INTEGER NOT NULL,
                backoff_base         INTEGER NOT NULL,
                worker_poll_interval REAL NOT NULL,
                job_timeout          INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let default_config = Config::default();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO config (id, max_retries, backoff_base, worker_poll_interval, job_timeout)
            VALUES (0, ?1, ?2, ?3, ?4)
            "#,
        )
        .bind(default_config.max_retries)
        .bind(default_config.backoff_base)
        .bind(default_config.worker_poll_interval)
        .bind(default_config.job_timeout as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Closes the underlying connection pool. Workers call this on orderly
    /// shutdown, mirroring the original's `storage.close()`.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Job> {
    let state_str: String = row.try_get("state")?;
    let state = JobState::parse(&state_str)
        .ok_or_else(|| anyhow::anyhow!("corrupt state value '{state_str}' in store"))?;

    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let next_retry_at: Option<String> = row.try_get("next_retry_at")?;
    let lease_expires_at: Option<String> = row.try_get("lease_expires_at")?;

    Ok(Job {
        id: row.try_get("id")?,
        command: row.try_get("command")?,
        state,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        max_retries: row.try_get::<i64, _>("max_retries")? as u32,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
        next_retry_at: next_retry_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()?,
        error_message: row.try_get("error_message")?,
        lease_owner: row.try_get("lease_owner")?,
        lease_expires_at: lease_expires_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()?,
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn acquire_next(&self, worker_id: &str, now: DateTime<Utc>) -> anyhow::Result<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result: anyhow::Result<Option<Job>> = async {
            let job_timeout: i64 = sqlx::query("SELECT job_timeout FROM config WHERE id = 0")
                .fetch_one(&mut *conn)
                .await?
                .try_get("job_timeout")?;

            let now_str = now.to_rfc3339();
            let row = sqlx::query(
                r#"
                SELECT * FROM jobs
                WHERE (state = 'pending')
                   OR (state = 'failed' AND next_retry_at <= ?1)
                   OR (state = 'processing' AND lease_expires_at <= ?1)
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                "#,
            )
            .bind(&now_str)
            .fetch_optional(&mut *conn)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            let job = row_to_job(&row)?;
            let lease_expires_at = now + Duration::seconds(job_timeout) + LEASE_GRACE;

            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'processing',
                    lease_owner = ?1,
                    lease_expires_at = ?2,
                    updated_at = ?3
                WHERE id = ?4
                "#,
            )
            .bind(worker_id)
            .bind(lease_expires_at.to_rfc3339())
            .bind(now_str)
            .bind(&job.id)
            .execute(&mut *conn)
            .await?;

            Ok(Some(Job {
                state: JobState::Processing,
                lease_owner: Some(worker_id.to_string()),
                lease_expires_at: Some(lease_expires_at),
                updated_at: now,
                ..job
            }))
        }
        .await;

        match result {
            Ok(job) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(job)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn put(&self, job: &Job, expect_absent: bool) -> anyhow::Result<PutOutcome> {
        let mut tx = self.pool.begin().await?;

        if expect_absent {
            let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM jobs WHERE id = ?1")
                .bind(&job.id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_some() {
                return Ok(PutOutcome::AlreadyExists);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, command, state, attempts, max_retries,
                created_at, updated_at, next_retry_at, error_message,
                lease_owner, lease_expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                command = excluded.command,
                state = excluded.state,
                attempts = excluded.attempts,
                max_retries = excluded.max_retries,
                updated_at = excluded.updated_at,
                next_retry_at = excluded.next_retry_at,
                error_message = excluded.error_message,
                lease_owner = excluded.lease_owner,
                lease_expires_at = excluded.lease_expires_at
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.state.as_str())
        .bind(job.attempts as i64)
        .bind(job.max_retries as i64)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .bind(job.next_retry_at.map(|t| t.to_rfc3339()))
        .bind(&job.error_message)
        .bind(&job.lease_owner)
        .bind(job.lease_expires_at.map(|t| t.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(PutOutcome::Inserted)
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn list_all(&self) -> anyhow::Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn list_by_state(&self, state: JobState) -> anyhow::Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE state = ?1 ORDER BY created_at ASC, id ASC")
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn counts_by_state(&self) -> anyhow::Result<StateCounts> {
        let rows = sqlx::query("SELECT state, COUNT(*) as n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts: StateCounts = BTreeMap::new();
        for state in JobState::ALL {
            counts.insert(state, 0);
        }
        for row in rows {
            let state_str: String = row.try_get("state")?;
            let n: i64 = row.try_get("n")?;
            if let Some(state) = JobState::parse(&state_str) {
                counts.insert(state, n as u64);
            }
        }
        Ok(counts)
    }

    async fn release(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE jobs SET lease_owner = NULL, lease_expires_at = NULL WHERE id = ?1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all(&self, state: Option<JobState>) -> anyhow::Result<u64> {
        let result = match state {
            Some(state) => {
                sqlx::query("DELETE FROM jobs WHERE state = ?1")
                    .bind(state.as_str())
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM jobs").execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    async fn get_config(&self) -> anyhow::Result<Config> {
        let row = sqlx::query("SELECT * FROM config WHERE id = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(Config {
            max_retries: row.try_get::<i64, _>("max_retries")? as u32,
            backoff_base: row.try_get::<i64, _>("backoff_base")? as u32,
            worker_poll_interval: row.try_get("worker_poll_interval")?,
            job_timeout: row.try_get::<i64, _>("job_timeout")? as u64,
        })
    }

    async fn put_config(&self, config: &Config) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE config SET
                max_retries = ?1,
                backoff_base = ?2,
                worker_poll_interval = ?3,
                job_timeout = ?4
            WHERE id = 0
            "#,
        )
        .bind(config.max_retries)
        .bind(config.backoff_base)
        .bind(config.worker_poll_interval)
        .bind(config.job_timeout as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuectl_core::JobState;
    use std::sync::Arc;

    async fn temp_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queuectl.db");
        let store = SqliteStore::connect(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn enqueue_rejects_duplicate_id() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();
        let job = Job::new("j1".into(), "echo hi".into(), 3, now);

        assert_eq!(store.put(&job, true).await.unwrap(), PutOutcome::Inserted);
        assert_eq!(
            store.put(&job, true).await.unwrap(),
            PutOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn acquire_next_prefers_fifo_and_leases_exclusively() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();

        let j1 = Job::new("j1".into(), "echo 1".into(), 3, now);
        let j2 = Job::new("j2".into(), "echo 2".into(), 3, now + Duration::seconds(1));
        store.put(&j1, true).await.unwrap();
        store.put(&j2, true).await.unwrap();

        let acquired = store.acquire_next("worker-a", now).await.unwrap().unwrap();
        assert_eq!(acquired.id, "j1");
        assert_eq!(acquired.state, JobState::Processing);
        assert_eq!(acquired.lease_owner.as_deref(), Some("worker-a"));

        // j1 is leased and not yet expired, so the next call picks j2.
        let acquired2 = store.acquire_next("worker-b", now).await.unwrap().unwrap();
        assert_eq!(acquired2.id, "j2");

        // No more jobs leasable.
        assert!(store.acquire_next("worker-c", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_processing_lease_is_reclaimable() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();
        let job = Job::new("j1".into(), "sleep 30".into(), 0, now);
        store.put(&job, true).await.unwrap();

        let leased = store.acquire_next("worker-a", now).await.unwrap().unwrap();
        let expiry = leased.lease_expires_at.unwrap();

        // Still within the lease: not reclaimable.
        assert!(store
            .acquire_next("worker-b", expiry - Duration::seconds(1))
            .await
            .unwrap()
            .is_none());

        // Past the lease: reclaimable by a different worker.
        let reclaimed = store
            .acquire_next("worker-b", expiry + Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.id, "j1");
        assert_eq!(reclaimed.lease_owner.as_deref(), Some("worker-b"));
    }

    /// S5: a worker that persists the incremented `attempts` before running
    /// the subprocess, then crashes mid-attempt without ever writing the
    /// terminal outcome, must leave that increment durable — the next
    /// worker to reclaim the expired lease sees `attempts` already bumped.
    #[tokio::test]
    async fn attempts_increment_survives_crash_before_terminal_write() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();
        let job = Job::new("j1".into(), "sleep 30".into(), 3, now);
        store.put(&job, true).await.unwrap();

        let leased = store.acquire_next("worker-a", now).await.unwrap().unwrap();
        let expiry = leased.lease_expires_at.unwrap();

        // Mirrors Worker::execute's pre-run persist: attempts bumped and
        // written back while the job is still `processing` under its lease.
        let mut mid_attempt = leased.clone();
        mid_attempt.attempts += 1;
        store.put(&mid_attempt, false).await.unwrap();

        // Worker is killed here, before any terminal write.

        let reclaimed = store
            .acquire_next("worker-b", expiry + Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.id, "j1");
        assert_eq!(reclaimed.attempts, 1, "the increment must not be lost");
    }

    #[tokio::test]
    async fn failed_job_not_eligible_before_next_retry_at() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();
        let mut job = Job::new("j1".into(), "false".into(), 3, now);
        job.state = JobState::Failed;
        job.next_retry_at = Some(now + Duration::seconds(10));
        store.put(&job, true).await.unwrap();

        assert!(store.acquire_next("worker-a", now).await.unwrap().is_none());
        let acquired = store
            .acquire_next("worker-a", now + Duration::seconds(11))
            .await
            .unwrap();
        assert_eq!(acquired.unwrap().id, "j1");
    }

    #[tokio::test]
    async fn delete_all_filters_by_state() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();
        let mut dead = Job::new("d1".into(), "false".into(), 0, now);
        dead.state = JobState::Dead;
        let pending = Job::new("p1".into(), "true".into(), 0, now);
        store.put(&dead, true).await.unwrap();
        store.put(&pending, true).await.unwrap();

        let deleted = store.delete_all(Some(JobState::Dead)).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get("d1").await.unwrap().is_none());
        assert!(store.get("p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn config_round_trips() {
        let (store, _dir) = temp_store().await;
        let mut cfg = store.get_config().await.unwrap();
        assert_eq!(cfg, Config::default());

        cfg.max_retries = 7;
        store.put_config(&cfg).await.unwrap();
        assert_eq!(store.get_config().await.unwrap().max_retries, 7);
    }

    /// P1/S6: concurrent `acquire_next` callers must partition the jobs,
    /// never double-acquiring one while its lease is live.
    #[tokio::test]
    async fn concurrent_acquire_next_never_double_acquires() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queuectl.db");
        let store = Arc::new(
            SqliteStore::connect(path.to_str().unwrap())
                .await
                .unwrap(),
        );

        let now = Utc::now();
        for i in 0..100 {
            let id = format!("j{i:03}");
            let job = Job::new(id, "echo $ID".into(), 3, now + Duration::milliseconds(i));
            store.put(&job, true).await.unwrap();
        }

        let mut handles = Vec::new();
        for w in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let worker_id = format!("worker-{w}");
                let mut acquired = Vec::new();
                loop {
                    match store.acquire_next(&worker_id, Utc::now()).await.unwrap() {
                        Some(job) => acquired.push(job.id),
                        None => break,
                    }
                }
                acquired
            }));
        }

        let mut all_acquired = Vec::new();
        for handle in handles {
            all_acquired.extend(handle.await.unwrap());
        }

        all_acquired.sort();
        let mut deduped = all_acquired.clone();
        deduped.dedup();
        assert_eq!(all_acquired.len(), 100, "every job acquired exactly once");
        assert_eq!(deduped.len(), 100, "no job acquired twice");
    }
}
