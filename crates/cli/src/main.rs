//! The `foreman` binary: one subcommand per team verb.
//!
//! Usage:
//!   foreman start <team> 2:executor "wire the parser; test the parser"
//!   foreman status <team>
//!   foreman monitor <team> --poll 1000
//!   foreman shutdown <team> [--force]
//!   foreman scale-up <team> [k[:agent-type]]
//!   foreman scale-down <team> [k | worker-name]
//!   foreman scale-auto <team> on|off
//!   foreman cleanup <team>
//!
//! Exit codes: 0 success, 1 expected failure (gate blocked, not found),
//! 2 usage error.
//!
//! # Environment Variables
//!
//! - `FOREMAN_LOG` - log filter (default `info`), written to stderr
//! - `FOREMAN_WORKER_CLI` - worker CLI for `run` mode (default `codex`)
//! - `FORCE_TRANSPORT` - `1` forces tmux, `0` forces the process transport
//! - plus the runtime knobs: `READY_TIMEOUT_MS`, `LEADER_NUDGE_MS`,
//!   `CLAIM_LEASE_MS`, `SHUTDOWN_GRACE_MS`, `AUTO_SCALE`, `SCALE_*`,
//!   `DRAIN_TIMEOUT_MS`

mod runner;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foreman_common::{ScalingTrigger, TaskCounts};
use foreman_runtime::{
    cleanup_team, monitor_loop, scale_down, scale_up, shutdown_team, RuntimeConfig,
    ScaleDownOutcome, ScaleDownRequest, ScaleUpOutcome, ShutdownOutcome, StartOptions, TaskSeed,
    TeamRuntime,
};
use foreman_store::TeamIndex;
use foreman_transport::{
    detect_transport, spawner_for, ProcessTransport, SystemCommandRunner, TmuxTransport, Transport,
    TransportKind,
};

#[derive(Parser)]
#[command(name = "foreman", version, about = "Local multi-worker agent team orchestrator")]
struct Cli {
    /// Project root holding the `state/team` directory.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Worker CLI to spawn (`codex` or `claude`).
    #[arg(long, global = true, default_value = "codex")]
    worker_cli: String,

    /// Optional TOML config file; env vars still override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a team with N workers; tasks come from the descriptor list.
    Start {
        team: String,
        /// Worker spec, `N:<agent-type>` (e.g. `3:executor`).
        spec: String,
        /// Task descriptors, separated by `;`.
        task: String,
    },
    /// Print task counts, worker states, phase, and recommendations.
    Status { team: String },
    /// Run monitor ticks, one structured line per tick.
    Monitor {
        team: String,
        #[arg(long, default_value_t = 1000)]
        poll: u64,
    },
    /// Graceful shutdown (or forced with --force).
    Shutdown {
        team: String,
        #[arg(long)]
        force: bool,
    },
    /// Add workers: `k[:agent-type]`, default 1 of the team's type.
    ScaleUp {
        team: String,
        spec: Option<String>,
    },
    /// Drain k workers, or the named one.
    ScaleDown {
        team: String,
        target: Option<String>,
    },
    /// Toggle auto-apply of high-confidence recommendations.
    ScaleAuto { team: String, mode: String },
    /// Forced cleanup; safe after a crash.
    Cleanup { team: String },
    /// Internal: read a JSON run request on stdin and drive the team.
    #[command(hide = true)]
    Run,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("FOREMAN_LOG")
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = RuntimeConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Start { team, spec, task } => {
            let Some((count, agent_type)) = parse_scale_spec(&spec) else {
                eprintln!("usage: foreman start <team> N:<agent-type> \"<task>\"");
                return Ok(ExitCode::from(2));
            };
            let rt = build_runtime(&cli.project, &team, &cli.worker_cli, config).await?;
            let tasks: Vec<TaskSeed> = task
                .split(';')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| TaskSeed::new(t, t))
                .collect();
            let opts = StartOptions {
                task_description: task.clone(),
                worker_count: count,
                agent_types: vec![agent_type.unwrap_or_else(|| "executor".into())],
                tasks,
                leader_args: vec![],
            };
            let report = rt.start_team(opts, &cancel_on_ctrl_c()).await?;
            println!(
                "team {} started: {} worker(s), {} task(s), session {}",
                report.team,
                report.workers.len(),
                report.task_ids.len(),
                report.session
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Status { team } => {
            let rt = build_runtime(&cli.project, &team, &cli.worker_cli, config).await?;
            let Some(manifest) = rt.manifest.load() else {
                return Ok(team_not_found(&cli.project, &team));
            };
            let snapshot = rt.load_snapshot();
            let counts = TaskCounts::tally(&rt.tasks.list());
            let phase = serde_json::to_value(snapshot.phase)?;
            println!(
                "team {}: phase={} workers={} draining={} dead={}",
                team,
                phase.as_str().unwrap_or("start"),
                manifest.active_worker_count,
                manifest.draining_workers.len(),
                snapshot.dead_workers.len()
            );
            println!(
                "tasks: pending={} blocked={} in_progress={} completed={} failed={}",
                counts.pending, counts.blocked, counts.in_progress, counts.completed, counts.failed
            );
            println!(
                "{}",
                serde_json::json!({
                    "team": team,
                    "phase": snapshot.phase,
                    "task_counts": counts,
                    "worker_states": snapshot.worker_states,
                    "dead_workers": snapshot.dead_workers,
                    "recommendations": snapshot.recommendations,
                    "auto_scale": manifest.scaling.auto_apply,
                })
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Monitor { team, poll } => {
            let rt = Arc::new(build_runtime(&cli.project, &team, &cli.worker_cli, config).await?);
            if !rt.manifest.exists() {
                return Ok(team_not_found(&cli.project, &team));
            }
            let cancel = cancel_on_ctrl_c();
            let result = monitor_loop(&rt, poll, &cancel, |report| {
                println!(
                    "{}",
                    serde_json::json!({
                        "phase": report.snapshot.phase,
                        "tasks": report.snapshot.task_counts,
                        "workers": report.snapshot.worker_states,
                        "dead": report.snapshot.dead_workers,
                        "expired": report.expired_tasks,
                        "notified": report.notified_messages,
                        "tick_ms": report.snapshot.timings.total_ms,
                    })
                );
            })
            .await;
            match result {
                Ok(snapshot) => {
                    println!(
                        "team {} reached {}",
                        team,
                        serde_json::to_value(snapshot.phase)?
                            .as_str()
                            .unwrap_or("terminal")
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(foreman_common::ForemanError::Cancelled) => Ok(ExitCode::SUCCESS),
                Err(e) => Err(e.into()),
            }
        }

        Command::Shutdown { team, force } => {
            let rt = build_runtime(&cli.project, &team, &cli.worker_cli, config).await?;
            if !rt.manifest.exists() {
                return Ok(team_not_found(&cli.project, &team));
            }
            match shutdown_team(&rt, force, false, &cancel_on_ctrl_c()).await? {
                ShutdownOutcome::Completed(summary) => {
                    println!(
                        "team {} shut down: {} slot(s) killed, state {}",
                        team,
                        summary.killed,
                        if summary.state_removed { "removed" } else { "kept" }
                    );
                    println!("{}", serde_json::to_string(&summary)?);
                    Ok(ExitCode::SUCCESS)
                }
                ShutdownOutcome::GateBlocked { active_workers } => {
                    println!(
                        "shutdown gate blocked: active workers {:?} (use --force to override)",
                        active_workers
                    );
                    Ok(ExitCode::from(1))
                }
                ShutdownOutcome::Rejected { workers } => {
                    println!(
                        "shutdown rejected by {:?} (use --force to override)",
                        workers
                    );
                    Ok(ExitCode::from(1))
                }
            }
        }

        Command::ScaleUp { team, spec } => {
            let (count, agent_type) = match spec.as_deref() {
                None => (1, None),
                Some(s) => match parse_scale_spec(s) {
                    Some(parsed) => parsed,
                    None => {
                        eprintln!("usage: foreman scale-up <team> [k[:agent-type]]");
                        return Ok(ExitCode::from(2));
                    }
                },
            };
            let rt = build_runtime(&cli.project, &team, &cli.worker_cli, config).await?;
            if !rt.manifest.exists() {
                return Ok(team_not_found(&cli.project, &team));
            }
            match scale_up(&rt, count, agent_type, ScalingTrigger::Manual, &cancel_on_ctrl_c())
                .await?
            {
                ScaleUpOutcome::Added { workers } => {
                    println!("added {} worker(s): {:?}", workers.len(), workers);
                    Ok(ExitCode::SUCCESS)
                }
                ScaleUpOutcome::LimitReached { max } => {
                    println!("scale-up refused: worker ceiling {max} reached");
                    Ok(ExitCode::from(1))
                }
                ScaleUpOutcome::CooldownActive { remaining_ms } => {
                    println!("scale-up refused: cooldown active ({remaining_ms} ms left)");
                    Ok(ExitCode::from(1))
                }
                ScaleUpOutcome::ResourceDenied { reason } => {
                    println!("scale-up refused: {reason}");
                    Ok(ExitCode::from(1))
                }
                ScaleUpOutcome::LockHeld { pid } => {
                    println!("scale-up refused: scaling lock held by pid {pid}");
                    Ok(ExitCode::from(1))
                }
            }
        }

        Command::ScaleDown { team, target } => {
            let request = match target.as_deref() {
                None => ScaleDownRequest::Count(1),
                Some(t) => match t.parse::<usize>() {
                    Ok(k) => ScaleDownRequest::Count(k),
                    Err(_) => ScaleDownRequest::Named(t.to_string()),
                },
            };
            let rt = build_runtime(&cli.project, &team, &cli.worker_cli, config).await?;
            if !rt.manifest.exists() {
                return Ok(team_not_found(&cli.project, &team));
            }
            match scale_down(&rt, request, ScalingTrigger::Manual).await? {
                ScaleDownOutcome::Draining { draining, removed } => {
                    println!(
                        "draining {:?}; removed {:?}",
                        draining, removed
                    );
                    Ok(ExitCode::SUCCESS)
                }
                ScaleDownOutcome::FloorReached { min } => {
                    println!("scale-down refused: already at floor ({min})");
                    Ok(ExitCode::from(1))
                }
                ScaleDownOutcome::WorkerNotFound { name } => {
                    println!("worker not found: {name}");
                    Ok(ExitCode::from(1))
                }
            }
        }

        Command::ScaleAuto { team, mode } => {
            let enable = match mode.as_str() {
                "on" => true,
                "off" => false,
                _ => {
                    eprintln!("usage: foreman scale-auto <team> on|off");
                    return Ok(ExitCode::from(2));
                }
            };
            let rt = build_runtime(&cli.project, &team, &cli.worker_cli, config).await?;
            if !rt.manifest.exists() {
                return Ok(team_not_found(&cli.project, &team));
            }
            rt.manifest.update(|m| m.scaling.auto_apply = enable)?;
            println!("auto-scale {}", if enable { "on" } else { "off" });
            Ok(ExitCode::SUCCESS)
        }

        Command::Cleanup { team } => {
            let rt = build_runtime(&cli.project, &team, &cli.worker_cli, config).await?;
            let summary = cleanup_team(&rt).await?;
            println!(
                "cleanup of {}: {} slot(s) killed, state {}",
                team,
                summary.killed,
                if summary.state_removed { "removed" } else { "absent" }
            );
            println!("{}", serde_json::to_string(&summary)?);
            Ok(ExitCode::SUCCESS)
        }

        Command::Run => {
            let worker_cli = std::env::var("FOREMAN_WORKER_CLI")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(cli.worker_cli);
            runner::run_from_stdin(&worker_cli, config).await
        }
    }
}

/// Pick the transport (probe or forced) and assemble a runtime.
async fn build_runtime(
    project: &PathBuf,
    team: &str,
    worker_cli: &str,
    config: RuntimeConfig,
) -> anyhow::Result<TeamRuntime> {
    let runner = Arc::new(SystemCommandRunner);
    let kind = detect_transport(runner.as_ref(), config.force_transport).await?;
    let transport: Arc<dyn Transport> = match kind {
        TransportKind::Multiplexed => Arc::new(TmuxTransport::new(runner)),
        TransportKind::Process => Arc::new(ProcessTransport::new()),
    };
    let spawner = spawner_for(worker_cli)?;
    Ok(TeamRuntime::new(project.clone(), team, transport, spawner, config))
}

/// `N:<agent-type>` or plain `N`.
fn parse_scale_spec(spec: &str) -> Option<(usize, Option<String>)> {
    match spec.split_once(':') {
        Some((count, agent_type)) if !agent_type.trim().is_empty() => {
            Some((count.trim().parse().ok()?, Some(agent_type.trim().to_string())))
        }
        Some(_) => None,
        None => Some((spec.trim().parse().ok()?, None)),
    }
}

fn team_not_found(project: &PathBuf, team: &str) -> ExitCode {
    let known: Vec<String> = TeamIndex::new(project)
        .list()
        .into_iter()
        .map(|e| e.name)
        .collect();
    if known.is_empty() {
        println!("team not found: {team}");
    } else {
        println!("team not found: {team} (known teams: {})", known.join(", "));
    }
    ExitCode::from(1)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scale_spec() {
        assert_eq!(
            parse_scale_spec("3:executor"),
            Some((3, Some("executor".into())))
        );
        assert_eq!(parse_scale_spec("2"), Some((2, None)));
        assert_eq!(parse_scale_spec("2:"), None);
        assert_eq!(parse_scale_spec("x:executor"), None);
        assert_eq!(parse_scale_spec(""), None);
    }
}
