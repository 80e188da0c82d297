//! Supervisor interface: spawn worker processes, signal them to stop, list
//! their liveness. Kept thin and specified only at its contract with the
//! worker loop (spec.md section 4.5) — table formatting and CLI plumbing
//! live in the CLI crate.
//!
//! Supplements the distilled spec with the original's `WorkerManager`
//! behavior (`queuectl/cli.py`'s `manager.start_workers` /
//! `stop_workers` / `get_worker_status`, backed by `psutil`): workers are
//! separate OS processes, tracked via a small sidecar file next to the
//! store so a later CLI invocation can still find and signal them.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub pid: u32,
    pub started_at: String,
}

/// Tracks spawned worker processes in `<db_path>.workers.json`, the
/// sidecar file analogous to the original's in-memory `WorkerManager`
/// state, made durable across CLI invocations.
pub struct Supervisor {
    sidecar_path: PathBuf,
}

impl Supervisor {
    pub fn new(db_path: &Path) -> Self {
        let mut sidecar = db_path.as_os_str().to_owned();
        sidecar.push(".workers.json");
        Supervisor {
            sidecar_path: PathBuf::from(sidecar),
        }
    }

    fn load(&self) -> Vec<WorkerRecord> {
        fs::read_to_string(&self.sidecar_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save(&self, records: &[WorkerRecord]) -> anyhow::Result<()> {
        fs::write(&self.sidecar_path, serde_json::to_string_pretty(records)?)?;
        Ok(())
    }

    /// Re-execs the current binary as `<exe> worker run --id <id> --db
    /// <db_path>` for each of `count` workers, recording their PIDs.
    pub fn spawn_workers(&self, count: u32, db_path: &str) -> anyhow::Result<Vec<u32>> {
        let exe = std::env::current_exe()?;
        let mut records = self.load();
        let mut pids = Vec::new();

        for _ in 0..count {
            let worker_id = format!("worker-{}", uuid::Uuid::new_v4());
            let child = Command::new(&exe)
                .arg("worker")
                .arg("run")
                .arg("--id")
                .arg(&worker_id)
                .arg("--db")
                .arg(db_path)
                .spawn()?;

            let pid = child.id();
            pids.push(pid);
            records.push(WorkerRecord {
                pid,
                started_at: humantime_now(),
            });
            // Not `.wait()`-ed: these are long-lived daemon processes, not
            // children this call owns the lifetime of.
            drop(child);
        }

        self.save(&records)?;
        Ok(pids)
    }

    /// Signals every tracked worker to stop. Graceful sends SIGTERM
    /// (worker finishes its current job before exiting); forceful sends
    /// SIGKILL immediately, leaving any in-flight job's lease to expire
    /// naturally (spec.md section 4.3/5).
    pub fn signal_stop(&self, graceful: bool) -> anyhow::Result<usize> {
        let records = self.load();
        let mut signalled = 0;

        for record in &records {
            if is_alive(record.pid) {
                send_signal(record.pid, graceful);
                signalled += 1;
            }
        }

        self.save(&prune_dead(records))?;
        Ok(signalled)
    }

    /// Lists currently live tracked workers.
    pub fn list(&self) -> Vec<WorkerRecord> {
        let live: Vec<WorkerRecord> = self
            .load()
            .into_iter()
            .filter(|r| is_alive(r.pid))
            .collect();
        live
    }
}

fn prune_dead(records: Vec<WorkerRecord>) -> Vec<WorkerRecord> {
    records.into_iter().filter(|r| is_alive(r.pid)).collect()
}

fn humantime_now() -> String {
    let now = SystemTime::now();
    let secs = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

#[cfg(unix)]
fn is_alive(pid: u32) -> bool {
    // A zero signal performs no action but still validates the target
    // exists and is signalable — the standard unix liveness probe.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn send_signal(pid: u32, graceful: bool) {
    let sig = if graceful { libc::SIGTERM } else { libc::SIGKILL };
    unsafe {
        libc::kill(pid as libc::pid_t, sig);
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _graceful: bool) {}
