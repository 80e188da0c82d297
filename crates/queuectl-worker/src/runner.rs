//! Subprocess execution with a wall-clock timeout. See spec.md section 4.4.
//!
//! Each command is spawned through the host shell in its own process group
//! (unix) so that a timeout can kill the whole tree, not just the direct
//! child — grounded in codex's `spawn.rs` / `utils/pty/src/process_group.rs`,
//! which solve exactly this "don't leak `sh -c 'sleep 100'`" problem.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Outcome of one subprocess attempt, already classified per spec.md's
/// exit-code/timeout/spawn-error rules. This is a normal result, not an
/// error type — a failed attempt is expected output, not a runner failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure(String),
}

/// Runs `command` under the host shell, enforcing `timeout`. Stdout is
/// captured for advisory logging only; stderr (trimmed) becomes the failure
/// message on non-zero exit. On timeout the whole process group is killed
/// before returning, so no grandchild (e.g. from `sh -c 'sleep 100'`) is
/// left running.
pub async fn run_job(command: &str, timeout: Duration) -> RunOutcome {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| process_group::set_process_group());
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return RunOutcome::Failure(e.to_string()),
    };

    // Captured before the wait future takes ownership of the child's stdio
    // handles; `set_process_group` made this pid double as the pgid.
    let pid = child.id();

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => classify(output),
        Ok(Err(e)) => RunOutcome::Failure(e.to_string()),
        Err(_elapsed) => {
            if let Some(pid) = pid {
                process_group::kill_process_group_by_pid(pid);
            }
            RunOutcome::Failure(format!("Job timed out after {} seconds", timeout.as_secs()))
        }
    }
}

fn classify(output: std::process::Output) -> RunOutcome {
    if output.status.success() {
        if !output.stdout.is_empty() {
            tracing::debug!(stdout = %String::from_utf8_lossy(&output.stdout), "job stdout");
        }
        RunOutcome::Success
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("Exit code: {}", output.status.code().unwrap_or(-1))
        } else {
            stderr
        };
        RunOutcome::Failure(message)
    }
}

#[cfg(unix)]
mod process_group {
    use std::io;

    /// Put the calling process into its own process group. Intended for use
    /// in `pre_exec` so the spawned shell becomes the group leader and a
    /// timeout kill can take down its whole subtree.
    pub fn set_process_group() -> io::Result<()> {
        let result = unsafe { libc::setpgid(0, 0) };
        if result == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Sends `SIGKILL` to the process group led by `pid` (best-effort).
    pub fn kill_process_group_by_pid(pid: u32) {
        let pid = pid as libc::pid_t;
        let pgid = unsafe { libc::getpgid(pid) };
        if pgid == -1 {
            return;
        }
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
mod process_group {
    pub fn set_process_group() -> std::io::Result<()> {
        Ok(())
    }

    pub fn kill_process_group_by_pid(_pid: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn success_exit_zero() {
        let outcome = run_job("exit 0", Duration::from_secs(5)).await;
        assert_eq!(outcome, RunOutcome::Success);
    }

    #[tokio::test]
    async fn failure_exit_nonzero_without_stderr() {
        let outcome = run_job("exit 7", Duration::from_secs(5)).await;
        assert_eq!(outcome, RunOutcome::Failure("Exit code: 7".to_string()));
    }

    #[tokio::test]
    async fn failure_uses_trimmed_stderr() {
        let outcome = run_job("echo '  boom  ' >&2; exit 1", Duration::from_secs(5)).await;
        assert_eq!(outcome, RunOutcome::Failure("boom".to_string()));
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let outcome = run_job("sleep 10", Duration::from_millis(200)).await;
        match outcome {
            RunOutcome::Failure(msg) => assert!(msg.starts_with("Job timed out after")),
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_does_not_leak_grandchild() {
        // The grandchild (`sleep 5` inside a subshell) must die when the
        // parent's process group is killed, not just the direct `sh` child.
        let outcome = run_job("(sleep 5 &) ; sleep 5", Duration::from_millis(200)).await;
        assert!(matches!(outcome, RunOutcome::Failure(_)));
    }
}
