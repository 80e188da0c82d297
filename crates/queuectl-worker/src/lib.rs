//! Worker execution loop, subprocess runner, and the thin supervisor
//! interface used to spawn/stop/list worker processes.

pub mod runner;
pub mod supervisor;
pub mod worker;

pub use runner::{run_job, RunOutcome};
pub use supervisor::{Supervisor, WorkerRecord};
pub use worker::{new_running_flag, request_stop, RunningFlag, Worker};
