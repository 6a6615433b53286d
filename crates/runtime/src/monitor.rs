//! The monitor: one reconciling tick, the repeating loop, and the
//! per-worker output watchers.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use foreman_common::{
    EventKind, ForemanError, MonitorSnapshot, Result, TaskCounts, TeamEvent, TeamPhase,
    TickTimings, WorkerState,
};
use foreman_store::is_observed_dead;

use crate::runtime::TeamRuntime;
use crate::scaling;

/// What one tick observed and did.
#[derive(Debug)]
pub struct TickReport {
    pub snapshot: MonitorSnapshot,
    pub expired_tasks: Vec<String>,
    pub notified_messages: usize,
    pub nudged: bool,
}

/// A single reconciling tick, callable repeatedly.
pub async fn monitor_tick(rt: &TeamRuntime) -> Result<TickReport> {
    let tick_start = Instant::now();

    // Read everything once.
    let manifest = rt.load_manifest()?;
    let live_slots = rt
        .transport
        .list_slots(&manifest.transport_session)
        .await
        .unwrap_or_default();
    let read_ms = tick_start.elapsed().as_millis() as u64;

    // Sweep: dead workers, then lease expiry conditioned on them.
    let sweep_start = Instant::now();
    let mut dead_workers = Vec::new();
    for worker in &manifest.workers {
        let heartbeat = rt.workers.read_heartbeat(&worker.name);
        let listed = !worker.slot.is_empty() && live_slots.contains(&worker.slot);
        if is_observed_dead(heartbeat.as_ref(), listed, rt.config.inactivity_ceiling_ms) {
            dead_workers.push(worker.name.clone());
            rt.workers.mark_dead(&worker.name)?;
            let already_failed = rt
                .workers
                .read_status(&worker.name)
                .map(|s| s.state == WorkerState::Failed)
                .unwrap_or(false);
            if !already_failed {
                rt.workers.write_status(
                    &worker.name,
                    &foreman_common::WorkerStatusRecord::failed("process exited"),
                )?;
                rt.events.append(
                    &TeamEvent::new(&rt.team, EventKind::WorkerStopped)
                        .with_worker(&worker.name)
                        .with_reason("process exited"),
                )?;
            }
        }
    }
    let expired_tasks = rt.tasks.expire_leases(Utc::now(), &dead_workers);
    let sweep_ms = sweep_start.elapsed().as_millis() as u64;

    // Reconcile worker states for the snapshot.
    let mut worker_states = BTreeMap::new();
    for worker in &manifest.workers {
        let state = if dead_workers.contains(&worker.name) {
            WorkerState::Failed
        } else if manifest.is_draining(&worker.name) {
            WorkerState::Draining
        } else {
            rt.workers
                .read_status(&worker.name)
                .map(|s| s.state)
                .unwrap_or(WorkerState::Unknown)
        };
        worker_states.insert(worker.name.clone(), state);
    }

    // Phase derivation from task counts (forward-only).
    let tasks = rt.tasks.list();
    let counts = TaskCounts::tally(&tasks);
    let mut snapshot = rt.load_snapshot();
    if counts.all_terminal() {
        let target = if counts.failed == 0 {
            TeamPhase::Complete
        } else {
            TeamPhase::Fix
        };
        if snapshot.advance_phase(target) {
            info!(team = %rt.team, phase = ?target, "Phase advanced");
        }
    } else if counts.in_progress > 0 && snapshot.advance_phase(TeamPhase::Exec) {
        info!(team = %rt.team, "Phase advanced to team-exec");
    }

    // Notification sweep: poke live recipients with unnotified mail.
    let notify_start = Instant::now();
    let mut notified_messages = 0;
    for worker in &manifest.workers {
        if dead_workers.contains(&worker.name) || worker.slot.is_empty() {
            continue;
        }
        let pending = rt.mailbox.unnotified(&worker.name);
        if pending.is_empty() {
            continue;
        }
        // The messages are already durable in the mailbox; the trigger only
        // tells the worker to look.
        if rt.transport.send_submit(&worker.slot).await.is_ok() {
            for message in &pending {
                if rt.mailbox.mark_notified(&worker.name, &message.message_id)? {
                    notified_messages += 1;
                }
            }
        }
    }
    let notify_ms = notify_start.elapsed().as_millis() as u64;

    // Leader nudge on team-wide inactivity, with its own cooldown.
    let mut nudged = false;
    let latest_turn = manifest
        .workers
        .iter()
        .filter_map(|w| rt.workers.read_heartbeat(&w.name))
        .map(|hb| hb.last_turn_at)
        .max();
    if let Some(latest) = latest_turn {
        let now = Utc::now();
        let quiet =
            (now - latest).num_milliseconds().max(0) as u64 >= rt.config.leader_nudge_ms;
        let cooled = snapshot
            .last_nudge_at
            .map(|at| (now - at).num_milliseconds().max(0) as u64 >= rt.config.leader_nudge_ms)
            .unwrap_or(true);
        if quiet && cooled && !snapshot.phase.is_terminal() {
            rt.events
                .append(&TeamEvent::new(&rt.team, EventKind::TeamLeaderNudge).with_reason(
                    format!("no worker activity for {}ms", rt.config.leader_nudge_ms),
                ))?;
            snapshot.last_nudge_at = Some(now);
            nudged = true;
        }
    }

    // Scaling recommendation and confidence streak.
    let recommendation = scaling::compute_recommendation(rt, &manifest, &counts, &worker_states);
    if recommendation.is_none() {
        snapshot.recommendation_streak = 0;
    } else if snapshot.recommendations.first() == Some(&recommendation) {
        snapshot.recommendation_streak += 1;
    } else {
        snapshot.recommendation_streak = 1;
    }
    // A recommendation becomes high-confidence on its third consecutive
    // tick; record that moment in the scaling history.
    if snapshot.recommendation_streak == 3 {
        rt.history.append(foreman_common::ScalingEvent {
            timestamp: Utc::now(),
            action: foreman_common::ScalingAction::Recommendation,
            trigger: foreman_common::ScalingTrigger::Auto,
            workers_added: None,
            workers_removed: None,
            reason: format!("high-confidence: {recommendation:?}"),
            resource_snapshot: foreman_common::ResourceSnapshot {
                cpu_load_1m: None,
                free_mem_mb: None,
                active_workers: manifest.active_worker_count,
                pending_tasks: counts.pending,
                idle_workers: worker_states
                    .values()
                    .filter(|s| **s == WorkerState::Idle)
                    .count(),
            },
        })?;
    }
    snapshot.recommendations = if recommendation.is_none() {
        Vec::new()
    } else {
        vec![recommendation]
    };

    snapshot.task_counts = counts;
    snapshot.worker_states = worker_states;
    snapshot.dead_workers = dead_workers;
    snapshot.updated_at = Utc::now();
    let total_ms = tick_start.elapsed().as_millis() as u64;
    snapshot.timings = TickTimings {
        read_ms,
        sweep_ms,
        notify_ms,
        total_ms,
    };
    if total_ms > rt.config.tick_soft_budget_ms {
        warn!(team = %rt.team, total_ms, "Monitor tick exceeded soft budget");
    }
    rt.save_snapshot(&snapshot)?;

    Ok(TickReport {
        snapshot,
        expired_tasks,
        notified_messages,
        nudged,
    })
}

/// Run ticks until the team reaches a terminal phase.
///
/// Also completes pending drains and, when auto-scale is on, applies
/// high-confidence recommendations after their cooldown. One output watcher
/// is kept per live worker.
pub async fn monitor_loop(
    rt: &Arc<TeamRuntime>,
    poll_ms: u64,
    cancel: &CancellationToken,
    mut on_tick: impl FnMut(&TickReport),
) -> Result<MonitorSnapshot> {
    let interval =
        std::time::Duration::from_millis(poll_ms.max(rt.config.min_tick_interval_ms));
    let mut watched: HashSet<String> = HashSet::new();
    let mut watcher_handles = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return Err(ForemanError::Cancelled);
        }

        let report = monitor_tick(rt).await?;
        on_tick(&report);

        scaling::complete_drains(rt).await?;
        let auto = rt.config.auto_scale
            || rt
                .manifest
                .load()
                .map(|m| m.scaling.auto_apply)
                .unwrap_or(false);
        if auto {
            scaling::maybe_auto_apply(rt, &report.snapshot).await?;
        }

        // Keep one output watcher per live worker, including late arrivals
        // from scale-up.
        if let Some(manifest) = rt.manifest.load() {
            for worker in &manifest.workers {
                if !worker.slot.is_empty() && watched.insert(worker.name.clone()) {
                    watcher_handles.push(spawn_output_watcher(
                        rt.clone(),
                        worker.name.clone(),
                        worker.slot.clone(),
                        cancel.clone(),
                    ));
                }
            }
        }

        if report.snapshot.phase.is_terminal() {
            for handle in &watcher_handles {
                handle.abort();
            }
            return Ok(report.snapshot);
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                for handle in &watcher_handles {
                    handle.abort();
                }
                return Err(ForemanError::Cancelled);
            }
        }
    }
}

/// Watch one worker's output: any change to the capture tail counts as a
/// turn and refreshes the heartbeat.
pub fn spawn_output_watcher(
    rt: Arc<TeamRuntime>,
    worker: String,
    slot: String,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll = std::time::Duration::from_millis(1_000);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = cancel.cancelled() => break,
            }

            let Ok(capture) = rt.transport.capture(&slot).await else {
                break;
            };
            let mut hasher = DefaultHasher::new();
            capture.hash(&mut hasher);
            let digest = hasher.finish();

            let changed = {
                let mut seen = rt.capture_seen.lock().unwrap();
                seen.insert(worker.clone(), digest) != Some(digest)
            };
            if changed && !capture.is_empty() {
                debug!(worker = %worker, "Observed output, refreshing heartbeat");
                let _ = rt.workers.touch_heartbeat(&worker);
            }
        }
    })
}
