//! Error kinds surfaced by the core. See spec.md section 7.
//!
//! `ExecutionFailure` is deliberately absent here: a failed subprocess
//! attempt is not an error of the system, it is a normal outcome that drives
//! the retry state machine, and workers never let it escape as a `Result`
//! error (spec.md section 4.3, section 7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{0}")]
    InputError(String),

    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Exit code semantics for the CLI (spec.md section 6): 0 success, 1 error,
/// 130 interrupt. `QueueError` only ever maps to 1; interrupt handling lives
/// outside this enum, at the signal-handling boundary in the CLI.
pub trait Categorizable {
    fn exit_code(&self) -> i32;
}

impl Categorizable for QueueError {
    fn exit_code(&self) -> i32 {
        match self {
            QueueError::InputError(_) | QueueError::NotFound(_) | QueueError::Store(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
