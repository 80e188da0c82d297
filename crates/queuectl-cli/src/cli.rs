//! Argument parsing. Mirrors the original `click` command tree from
//! `queuectl/cli.py` 1:1, using `clap`'s derive API instead.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "queuectl",
    version,
    about = "A local, persistent background job queue with a CLI control plane"
)]
pub struct Cli {
    /// Path to the store file.
    #[arg(long, global = true, default_value = "queuectl.db")]
    pub db: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new job to the queue.
    Enqueue {
        /// JSON object (or @file path) with at least `id` and `command`.
        job_json: String,
    },

    /// Manage worker processes.
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },

    /// Show summary of all job states and active workers.
    Status,

    /// List jobs, optionally filtered.
    List {
        #[arg(long, short = 's')]
        state: Option<String>,
        #[arg(long, short = 'l', default_value_t = 50)]
        limit: usize,
    },

    /// Get detailed information about a specific job.
    Get { job_id: String },

    /// Manage the Dead Letter Queue.
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },

    /// Manage system configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Clear jobs from the queue.
    Clear {
        #[arg(long, short = 's')]
        state: Option<String>,
        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommand {
    /// Start one or more worker processes.
    Start {
        #[arg(long, short = 'c', default_value_t = 1)]
        count: u32,
    },
    /// Stop all running workers.
    Stop {
        /// Force kill workers immediately instead of a graceful stop.
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// Show status of running workers.
    Status,
    /// Internal: run a single worker loop in the foreground. Spawned by
    /// `worker start`; not meant to be invoked directly.
    #[command(hide = true)]
    Run {
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum DlqCommand {
    /// List all jobs in the Dead Letter Queue.
    List,
    /// Retry a job from the Dead Letter Queue.
    Retry {
        job_id: String,
        #[arg(long, short = 'r')]
        reset_attempts: bool,
    },
    /// Clear all jobs from the Dead Letter Queue.
    Clear {
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration.
    Show,
    /// Set a configuration value.
    Set { key: String, value: String },
}
