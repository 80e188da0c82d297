//! `queuectl` binary entry point: wires parsed arguments to the control
//! operations, the store, and the worker/supervisor runtime. See spec.md
//! section 6 for the CLI surface this mirrors from the original `cli.py`.

mod cli;
mod ops;
mod table;

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use queuectl_core::{format_timestamp, Categorizable, Job, JobState, JobStore, QueueError, CONFIG_KEYS};
use queuectl_sqlite::SqliteStore;
use queuectl_worker::{new_running_flag, request_stop, Supervisor, Worker};

use cli::{Cli, Command, ConfigCommand, DlqCommand, WorkerCommand};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("QUEUECTL_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
                .unwrap(),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to start the async runtime");

    runtime.block_on(run())
}

async fn run() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(()) => ExitCode::from(0),
        Err(Failure::Interrupted) => ExitCode::from(130),
        Err(Failure::Queue(err)) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
        Err(Failure::Other(err)) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

enum Failure {
    Queue(QueueError),
    Other(anyhow::Error),
    Interrupted,
}

impl From<QueueError> for Failure {
    fn from(e: QueueError) -> Self {
        Failure::Queue(e)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(e: anyhow::Error) -> Self {
        Failure::Other(e)
    }
}

async fn dispatch(cli: Cli) -> Result<(), Failure> {
    let db_path = PathBuf::from(&cli.db);

    match cli.command {
        Command::Enqueue { job_json } => enqueue(&db_path, job_json).await,
        Command::Worker { command } => worker_command(&db_path, cli.db, command).await,
        Command::Status => status(&db_path).await,
        Command::List { state, limit } => list(&db_path, state, limit).await,
        Command::Get { job_id } => get(&db_path, job_id).await,
        Command::Dlq { command } => dlq_command(&db_path, command).await,
        Command::Config { command } => config_command(&db_path, command).await,
        Command::Clear { state, yes } => clear(&db_path, state, yes).await,
    }
}

async fn open_store(db_path: &PathBuf) -> anyhow::Result<SqliteStore> {
    let path = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("database path is not valid UTF-8"))?;
    SqliteStore::connect(path).await
}

fn parse_state(state: Option<String>) -> Result<Option<JobState>, Failure> {
    match state {
        None => Ok(None),
        Some(s) => JobState::parse(&s)
            .map(Some)
            .ok_or_else(|| QueueError::InputError(format!("unknown state '{s}'")).into()),
    }
}

/// Reads the job-spec JSON. `@path` reads from a file, matching the
/// original's `cli.py` `enqueue` convention for longer command strings.
fn read_job_json(job_json: &str) -> anyhow::Result<serde_json::Value> {
    let raw = if let Some(path) = job_json.strip_prefix('@') {
        std::fs::read_to_string(path)?
    } else {
        job_json.to_string()
    };
    Ok(serde_json::from_str(&raw)?)
}

async fn enqueue(db_path: &PathBuf, job_json: String) -> Result<(), Failure> {
    let value = read_job_json(&job_json)
        .map_err(|e| QueueError::InputError(format!("invalid job JSON: {e}")))?;

    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| QueueError::InputError("job JSON must have a string 'id'".into()))?
        .to_string();
    let command = value
        .get("command")
        .and_then(|v| v.as_str())
        .ok_or_else(|| QueueError::InputError("job JSON must have a string 'command'".into()))?
        .to_string();
    let max_retries = value
        .get("max_retries")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32);

    let store = open_store(db_path).await?;
    let job = ops::enqueue(&store, id, command, max_retries).await?;
    println!("Enqueued job '{}'", job.id);
    Ok(())
}

async fn worker_command(db_path: &PathBuf, db_str: String, command: WorkerCommand) -> Result<(), Failure> {
    match command {
        WorkerCommand::Start { count } => {
            let supervisor = Supervisor::new(db_path);
            let pids = supervisor.spawn_workers(count, &db_str)?;
            println!("Started {} worker(s): {:?}", pids.len(), pids);
            Ok(())
        }
        WorkerCommand::Stop { force } => {
            let supervisor = Supervisor::new(db_path);
            let n = supervisor.signal_stop(!force)?;
            println!("Signalled {n} worker(s) to stop");
            Ok(())
        }
        WorkerCommand::Status => {
            let supervisor = Supervisor::new(db_path);
            let workers = supervisor.list();
            if workers.is_empty() {
                println!("No running workers");
            } else {
                let rows: Vec<Vec<String>> = workers
                    .iter()
                    .map(|w| vec![w.pid.to_string(), w.started_at.clone()])
                    .collect();
                print!("{}", table::render(&["PID", "STARTED"], &rows));
            }
            Ok(())
        }
        WorkerCommand::Run { id } => run_worker_foreground(db_path, id).await,
    }
}

/// Runs a single worker loop in the foreground. This is the process body
/// spawned by `worker start`'s supervisor re-exec, not meant to be invoked
/// directly by a user.
async fn run_worker_foreground(db_path: &PathBuf, worker_id: String) -> Result<(), Failure> {
    let store = Arc::new(open_store(db_path).await?);
    let running = new_running_flag();

    #[cfg(unix)]
    {
        let running = running.clone();
        tokio::spawn(async move {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            request_stop(&running);
        });
    }
    #[cfg(not(unix))]
    {
        let running = running.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            request_stop(&running);
        });
    }

    let worker = Worker::new(worker_id, store, running);
    worker.run().await?;
    Ok(())
}

async fn status(db_path: &PathBuf) -> Result<(), Failure> {
    let store = open_store(db_path).await?;
    let counts = store.counts_by_state().await?;

    let rows: Vec<Vec<String>> = JobState::ALL
        .iter()
        .map(|state| {
            vec![
                state.as_str().to_string(),
                counts.get(state).copied().unwrap_or(0).to_string(),
            ]
        })
        .collect();
    print!("{}", table::render(&["STATE", "COUNT"], &rows));

    let supervisor = Supervisor::new(db_path);
    let workers = supervisor.list();
    println!("\nActive workers: {}", workers.len());

    let config = store.get_config().await?;
    println!("\nConfig:");
    for key in CONFIG_KEYS {
        println!("  {key} = {}", config.get_by_key(key).unwrap_or_default());
    }
    Ok(())
}

async fn list(db_path: &PathBuf, state: Option<String>, limit: usize) -> Result<(), Failure> {
    let state = parse_state(state)?;
    let store = open_store(db_path).await?;
    let jobs = ops::list(&store, state, limit).await?;
    print!("{}", render_job_table(&jobs));
    Ok(())
}

async fn get(db_path: &PathBuf, job_id: String) -> Result<(), Failure> {
    let store = open_store(db_path).await?;
    let job = ops::get(&store, &job_id).await?;
    println!("{}", serde_json::to_string_pretty(&job).map_err(anyhow::Error::from)?);
    Ok(())
}

async fn dlq_command(db_path: &PathBuf, command: DlqCommand) -> Result<(), Failure> {
    let store = open_store(db_path).await?;
    match command {
        DlqCommand::List => {
            let jobs = ops::list(&store, Some(JobState::Dead), usize::MAX).await?;
            print!("{}", render_job_table(&jobs));
            Ok(())
        }
        DlqCommand::Retry { job_id, reset_attempts } => {
            let job = ops::dlq_retry(&store, &job_id, reset_attempts).await?;
            println!("Job '{}' re-queued as pending", job.id);
            Ok(())
        }
        DlqCommand::Clear { yes } => {
            if !yes && !confirm("Clear all dead-letter jobs?")? {
                println!("Aborted");
                return Ok(());
            }
            let n = ops::dlq_clear(&store).await?;
            println!("Cleared {n} dead-letter job(s)");
            Ok(())
        }
    }
}

async fn config_command(db_path: &PathBuf, command: ConfigCommand) -> Result<(), Failure> {
    let store = open_store(db_path).await?;
    match command {
        ConfigCommand::Show => {
            let config = store.get_config().await?;
            let rows: Vec<Vec<String>> = CONFIG_KEYS
                .iter()
                .map(|key| vec![key.to_string(), config.get_by_key(key).unwrap_or_default()])
                .collect();
            print!("{}", table::render(&["KEY", "VALUE"], &rows));
            Ok(())
        }
        ConfigCommand::Set { key, value } => {
            let mut config = store.get_config().await?;
            config
                .set_by_key(&key, &value)
                .map_err(QueueError::InputError)?;
            store.put_config(&config).await?;
            println!("Set {key} = {value}");
            Ok(())
        }
    }
}

async fn clear(db_path: &PathBuf, state: Option<String>, yes: bool) -> Result<(), Failure> {
    let parsed_state = parse_state(state.clone())?;
    let prompt = match &state {
        Some(s) => format!("Clear all jobs in state '{s}'?"),
        None => "Clear ALL jobs from the queue?".to_string(),
    };
    if !yes && !confirm(&prompt)? {
        println!("Aborted");
        return Ok(());
    }
    let store = open_store(db_path).await?;
    let n = ops::clear(&store, parsed_state).await?;
    println!("Cleared {n} job(s)");
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool, Failure> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush().map_err(anyhow::Error::from)?;

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .map_err(anyhow::Error::from)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn render_job_table(jobs: &[Job]) -> String {
    let rows: Vec<Vec<String>> = jobs
        .iter()
        .map(|job| {
            vec![
                job.id.clone(),
                table::truncate(&job.command, 40),
                job.state.as_str().to_string(),
                format!("{}/{}", job.attempts, job.max_retries),
                format_timestamp(job.updated_at),
            ]
        })
        .collect();
    table::render(&["ID", "COMMAND", "STATE", "ATTEMPTS", "UPDATED"], &rows)
}
