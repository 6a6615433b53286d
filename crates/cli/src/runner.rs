//! Stdin-driven run mode.
//!
//! Reads a single JSON request on stdin, starts the team, monitors it to a
//! terminal phase, shuts it down, and prints the result JSON on stdout.
//! Progress lines go to stderr so stdout stays machine-parseable.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use foreman_common::{TaskStatus, TeamPhase};
use foreman_runtime::{
    monitor_loop, shutdown_team, RuntimeConfig, ShutdownOutcome, StartOptions, TaskSeed,
    TeamRuntime,
};
use foreman_transport::{
    detect_transport, spawner_for, ProcessTransport, SystemCommandRunner, TmuxTransport, Transport,
    TransportKind,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest {
    team_name: String,
    worker_count: Option<usize>,
    #[serde(default)]
    agent_types: Vec<String>,
    tasks: Vec<RunTask>,
    cwd: PathBuf,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RunTask {
    subject: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResult {
    status: String,
    team_name: String,
    task_results: Vec<TaskResult>,
    duration: u64,
    worker_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskResult {
    task_id: String,
    status: TaskStatus,
    summary: String,
}

pub async fn run_from_stdin(worker_cli: &str, config: RuntimeConfig) -> anyhow::Result<ExitCode> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let request: RunRequest = serde_json::from_str(&input)?;

    let started = Instant::now();
    let worker_count = request.worker_count.unwrap_or(2).max(1);
    let poll = request.poll_interval_ms.unwrap_or(1_000);

    let runner = Arc::new(SystemCommandRunner);
    let kind = detect_transport(runner.as_ref(), config.force_transport).await?;
    let transport: Arc<dyn Transport> = match kind {
        TransportKind::Multiplexed => Arc::new(TmuxTransport::new(runner)),
        TransportKind::Process => Arc::new(ProcessTransport::new()),
    };
    let spawner = spawner_for(worker_cli)?;
    let rt = Arc::new(TeamRuntime::new(
        request.cwd.clone(),
        request.team_name.clone(),
        transport,
        spawner,
        config,
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let opts = StartOptions {
        task_description: request
            .tasks
            .iter()
            .map(|t| t.subject.as_str())
            .collect::<Vec<_>>()
            .join("; "),
        worker_count,
        agent_types: if request.agent_types.is_empty() {
            vec!["executor".to_string()]
        } else {
            request.agent_types.clone()
        },
        tasks: request
            .tasks
            .iter()
            .map(|t| {
                let mut seed = TaskSeed::new(&t.subject, &t.description);
                seed.requires_code_change = true;
                seed
            })
            .collect(),
        leader_args: vec![],
    };

    eprintln!("starting team {} with {} worker(s)", request.team_name, worker_count);
    rt.start_team(opts, &cancel).await?;

    let snapshot = monitor_loop(&rt, poll, &cancel, |report| {
        eprintln!(
            "tick: phase={:?} pending={} in_progress={} completed={} failed={}",
            report.snapshot.phase,
            report.snapshot.task_counts.pending,
            report.snapshot.task_counts.in_progress,
            report.snapshot.task_counts.completed,
            report.snapshot.task_counts.failed,
        );
    })
    .await?;

    let task_results: Vec<TaskResult> = rt
        .tasks
        .list()
        .into_iter()
        .map(|t| TaskResult {
            summary: t
                .result
                .clone()
                .or_else(|| t.error.clone())
                .unwrap_or_else(|| t.subject.clone()),
            task_id: t.id,
            status: t.status,
        })
        .collect();

    // Graceful first; fall back to forced so nothing leaks.
    match shutdown_team(&rt, false, false, &cancel).await? {
        ShutdownOutcome::Completed(_) => {}
        _ => {
            info!(team = %request.team_name, "Graceful shutdown blocked, forcing");
            let _ = shutdown_team(&rt, true, false, &cancel).await?;
        }
    }

    let completed = snapshot.phase == TeamPhase::Complete;
    let result = RunResult {
        status: if completed { "completed" } else { "failed" }.to_string(),
        team_name: request.team_name,
        task_results,
        duration: started.elapsed().as_millis() as u64,
        worker_count,
    };
    println!("{}", serde_json::to_string(&result)?);

    Ok(if completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
