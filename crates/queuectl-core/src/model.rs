//! Job and Config records.
//!
//! Both are plain data with no behavior beyond (de)serialization. Timestamps
//! always round-trip as ISO-8601 UTC with a trailing `Z`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The five states a job can occupy. Wire format is the lowercased variant
/// name, matching the original Python implementation's string constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Parses a state from its wire name. Used by `--state` filters and by
    /// the store when hydrating rows from the `state` TEXT column.
    pub fn parse(s: &str) -> Option<JobState> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(JobState::Pending),
            "processing" => Some(JobState::Processing),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "dead" => Some(JobState::Dead),
            _ => None,
        }
    }

    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];
}

/// A job in the queue. See spec.md section 3 for the invariants this record
/// must satisfy after every committed write (I1-I5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Builds a freshly enqueued job: `state=pending`, `attempts=0`, no
    /// lease, no retry schedule, timestamps set to `now`.
    pub fn new(id: String, command: String, max_retries: u32, now: DateTime<Utc>) -> Self {
        Job {
            id,
            command,
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            next_retry_at: None,
            error_message: None,
            lease_owner: None,
            lease_expires_at: None,
        }
    }
}

/// Formats a timestamp the way the CLI prints it: RFC 3339, seconds
/// precision, trailing `Z` — matching the original's `isoformat() + "Z"`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// System configuration, persisted as a singleton row alongside jobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub max_retries: u32,
    pub backoff_base: u32,
    pub worker_poll_interval: f64,
    pub job_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_retries: 3,
            backoff_base: 2,
            worker_poll_interval: 1.0,
            job_timeout: 300,
        }
    }
}

/// Names under which config keys are exposed to the CLI (`config show` /
/// `config set`), mirroring the original's `key_map` dict in `cli.py`.
pub const CONFIG_KEYS: [&str; 4] = [
    "max-retries",
    "backoff-base",
    "worker-poll-interval",
    "job-timeout",
];

impl Config {
    /// Looks up a value by its kebab-case CLI key name.
    pub fn get_by_key(&self, key: &str) -> Option<String> {
        match key {
            "max-retries" => Some(self.max_retries.to_string()),
            "backoff-base" => Some(self.backoff_base.to_string()),
            "worker-poll-interval" => Some(self.worker_poll_interval.to_string()),
            "job-timeout" => Some(self.job_timeout.to_string()),
            _ => None,
        }
    }

    /// Parses and applies a value by its kebab-case CLI key name. Returns
    /// `Err` with a description when `value` doesn't parse for that key's
    /// type, matching the original's `ValueError` path in `config_set`.
    pub fn set_by_key(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "max-retries" => {
                self.max_retries = value
                    .parse()
                    .map_err(|_| format!("invalid value '{value}' for {key}"))?;
            }
            "backoff-base" => {
                self.backoff_base = value
                    .parse()
                    .map_err(|_| format!("invalid value '{value}' for {key}"))?;
            }
            "worker-poll-interval" => {
                self.worker_poll_interval = value
                    .parse()
                    .map_err(|_| format!("invalid value '{value}' for {key}"))?;
            }
            "job-timeout" => {
                self.job_timeout = value
                    .parse()
                    .map_err(|_| format!("invalid value '{value}' for {key}"))?;
            }
            _ => return Err(format!("unknown config key '{key}'")),
        }
        Ok(())
    }
}
