//! The scaling engine: recommendations, scale-up, and LIFO drain-based
//! scale-down.

use std::collections::BTreeMap;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use foreman_common::{
    EventKind, MonitorSnapshot, ResourceSnapshot, Result, ScalingAction, ScalingEvent,
    ScalingRecommendation, ScalingTrigger, TaskCounts, TaskStatus, TeamEvent, TeamManifest,
    WorkerState, WorkerStatusRecord,
};
use foreman_store::LockOutcome;

use crate::bootstrap;
use crate::config::ABSOLUTE_MAX_WORKERS;
use crate::resources;
use crate::runtime::TeamRuntime;
use crate::shutdown::compute_kill_targets;

/// Marker stored on a draining worker's status once its slow-drain warning
/// has been emitted.
const DRAIN_WARNED: &str = "drain timeout exceeded";

#[derive(Debug)]
pub enum ScaleUpOutcome {
    Added { workers: Vec<String> },
    LimitReached { max: usize },
    CooldownActive { remaining_ms: u64 },
    ResourceDenied { reason: String },
    LockHeld { pid: u32 },
}

#[derive(Debug)]
pub enum ScaleDownOutcome {
    /// Workers marked draining; those without a live claim were removed
    /// immediately.
    Draining {
        draining: Vec<String>,
        removed: Vec<String>,
    },
    FloorReached { min: usize },
    WorkerNotFound { name: String },
}

#[derive(Debug, Clone)]
pub enum ScaleDownRequest {
    Count(usize),
    Named(String),
}

/// Pure recommendation from the reconciled view.
pub fn compute_recommendation(
    rt: &TeamRuntime,
    manifest: &TeamManifest,
    counts: &TaskCounts,
    worker_states: &BTreeMap<String, WorkerState>,
) -> ScalingRecommendation {
    let policy = &manifest.scaling;
    let active = manifest.active_worker_count;
    let pending = counts.pending;

    let desired_for_pending =
        |pending: usize| (pending as f64 / policy.scale_up_threshold).ceil() as usize;

    if active == 0 {
        return if pending > 0 {
            ScalingRecommendation::ScaleUp {
                count: desired_for_pending(pending).max(1),
            }
        } else {
            ScalingRecommendation::None
        };
    }

    if pending as f64 / active as f64 > policy.scale_up_threshold {
        let count = desired_for_pending(pending).saturating_sub(active).max(1);
        return ScalingRecommendation::ScaleUp { count };
    }

    let idle: Vec<&String> = worker_states
        .iter()
        .filter(|(_, state)| **state == WorkerState::Idle)
        .map(|(name, _)| name)
        .collect();
    if idle.len() as f64 / active as f64 > policy.scale_down_threshold {
        let now = Utc::now();
        let all_idle_long = idle.iter().all(|name| {
            rt.workers
                .read_status(name)
                .map(|s| {
                    (now - s.updated_at).num_milliseconds() >= policy.idle_timeout_ms as i64
                })
                .unwrap_or(false)
        });
        if all_idle_long {
            let keep = (active as f64 * policy.scale_down_threshold).ceil() as usize;
            let count = idle.len().saturating_sub(keep).max(1);
            return ScalingRecommendation::ScaleDown { count };
        }
    }

    ScalingRecommendation::None
}

/// Add `count` workers to a running team.
pub async fn scale_up(
    rt: &TeamRuntime,
    count: usize,
    agent_type: Option<String>,
    trigger: ScalingTrigger,
    cancel: &CancellationToken,
) -> Result<ScaleUpOutcome> {
    let manifest = rt.load_manifest()?;
    let policy = &manifest.scaling;
    let ceiling = policy.max_workers.min(ABSOLUTE_MAX_WORKERS);

    if manifest.active_worker_count + count > ceiling {
        return Ok(ScaleUpOutcome::LimitReached { max: ceiling });
    }

    let snapshot = rt.load_snapshot();
    if let Some(last) = snapshot.last_scaling_action_at {
        let elapsed = (Utc::now() - last).num_milliseconds().max(0) as u64;
        if elapsed < policy.cooldown_ms {
            return Ok(ScaleUpOutcome::CooldownActive {
                remaining_ms: policy.cooldown_ms - elapsed,
            });
        }
    }

    let counts = TaskCounts::tally(&rt.tasks.list());
    let resource_snapshot = resources::sample(
        manifest.active_worker_count,
        counts.pending,
        snapshot
            .worker_states
            .values()
            .filter(|s| **s == WorkerState::Idle)
            .count(),
    );
    let allowed = resources::allowed_new_workers(
        &resource_snapshot,
        manifest.resource_limits.min_free_mem_mb,
        policy.per_worker_mem_mb,
        manifest.resource_limits.max_cpu_percent,
    );
    if allowed < count {
        let reason = format!(
            "resources allow {} new worker(s), {} requested (cpu {:?}%, free {:?} MB)",
            allowed, count, resource_snapshot.cpu_load_1m, resource_snapshot.free_mem_mb
        );
        warn!(team = %rt.team, %reason, "Scale-up denied by resource check");
        return Ok(ScaleUpOutcome::ResourceDenied { reason });
    }

    let lock = foreman_store::ScalingLock::new(rt.paths.clone());
    let guard = match lock.acquire()? {
        LockOutcome::Acquired(guard) => guard,
        LockOutcome::Held { pid, .. } => return Ok(ScaleUpOutcome::LockHeld { pid }),
    };

    let agent_type = agent_type.unwrap_or_else(|| manifest.default_agent_type.clone());
    let mut added = Vec::new();
    let mut failure = None;
    for _ in 0..count {
        match bootstrap::bootstrap_worker(rt, &agent_type, &[], cancel).await {
            Ok(identity) => added.push(identity.name),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    rt.history.append(ScalingEvent {
        timestamp: Utc::now(),
        action: ScalingAction::ScaleUp,
        trigger,
        workers_added: Some(added.len()),
        workers_removed: None,
        reason: format!("requested {count}, added {}", added.len()),
        resource_snapshot,
    })?;
    let mut snapshot = rt.load_snapshot();
    snapshot.last_scaling_action_at = Some(Utc::now());
    rt.save_snapshot(&snapshot)?;

    lock.release(guard)?;

    match failure {
        Some(e) if added.is_empty() => Err(e),
        _ => {
            info!(team = %rt.team, added = ?added, "Scale-up complete");
            Ok(ScaleUpOutcome::Added { workers: added })
        }
    }
}

/// Drain (and, where possible, immediately remove) workers.
///
/// Candidates are picked idle-first with no in-progress task, largest index
/// first; the floor is `min_workers`.
pub async fn scale_down(
    rt: &TeamRuntime,
    request: ScaleDownRequest,
    trigger: ScalingTrigger,
) -> Result<ScaleDownOutcome> {
    let manifest = rt.load_manifest()?;
    let policy = &manifest.scaling;
    let tasks = rt.tasks.list();

    let has_live_claim = |name: &str| {
        tasks.iter().any(|t| {
            t.status == TaskStatus::InProgress
                && t.claim.as_ref().map(|c| c.worker.as_str()) == Some(name)
        })
    };

    let selected: Vec<String> = match &request {
        ScaleDownRequest::Named(name) => {
            if manifest.worker(name).is_none() {
                return Ok(ScaleDownOutcome::WorkerNotFound { name: name.clone() });
            }
            vec![name.clone()]
        }
        ScaleDownRequest::Count(k) => {
            let removable = manifest
                .active_worker_count
                .saturating_sub(policy.min_workers);
            if removable == 0 {
                return Ok(ScaleDownOutcome::FloorReached {
                    min: policy.min_workers,
                });
            }
            let k = (*k).min(removable);

            let mut candidates: Vec<_> = manifest
                .workers
                .iter()
                .filter(|w| !manifest.is_draining(&w.name))
                .collect();
            // Idle with no claim first, then everyone else; LIFO by index
            // within each group.
            candidates.sort_by_key(|w| {
                let idle_free = rt
                    .workers
                    .read_status(&w.name)
                    .map(|s| s.state == WorkerState::Idle)
                    .unwrap_or(false)
                    && !has_live_claim(&w.name);
                (!idle_free, std::cmp::Reverse(w.index))
            });
            candidates
                .into_iter()
                .take(k)
                .map(|w| w.name.clone())
                .collect()
        }
    };

    let mut removed = Vec::new();
    for name in &selected {
        rt.manifest.update(|m| {
            if !m.draining_workers.contains(name) {
                m.draining_workers.push(name.clone());
            }
        })?;
        rt.workers
            .write_status(name, &WorkerStatusRecord::draining())?;

        if !has_live_claim(name) && finalize_drain(rt, name).await? {
            removed.push(name.clone());
        }
    }

    let manifest_after = rt.load_manifest()?;
    let counts = TaskCounts::tally(&tasks);
    rt.history.append(ScalingEvent {
        timestamp: Utc::now(),
        action: ScalingAction::ScaleDown,
        trigger,
        workers_added: None,
        workers_removed: Some(removed.len()),
        reason: format!(
            "draining {:?}, removed {:?}",
            selected, removed
        ),
        resource_snapshot: ResourceSnapshot {
            cpu_load_1m: None,
            free_mem_mb: None,
            active_workers: manifest_after.active_worker_count,
            pending_tasks: counts.pending,
            idle_workers: 0,
        },
    })?;
    let mut snapshot = rt.load_snapshot();
    snapshot.last_scaling_action_at = Some(Utc::now());
    rt.save_snapshot(&snapshot)?;

    Ok(ScaleDownOutcome::Draining {
        draining: selected,
        removed,
    })
}

/// Finish a drain: shutdown rendezvous, kill within the exclusion rules,
/// drop the worker from the manifest.
async fn finalize_drain(rt: &TeamRuntime, name: &str) -> Result<bool> {
    let manifest = rt.load_manifest()?;
    let request = rt.signals.request_shutdown(name, "leader")?;

    let deadline = tokio::time::Instant::now() + rt.config.shutdown_grace();
    let mut acked = false;
    while tokio::time::Instant::now() < deadline {
        if let Some(ack) = rt.signals.read_ack_with_min(name, request.requested_at) {
            rt.events.append(
                &TeamEvent::new(&rt.team, EventKind::ShutdownAck)
                    .with_worker(name)
                    .with_reason(format!("{:?}", ack.status).to_lowercase()),
            )?;
            acked = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
    if !acked {
        warn!(team = %rt.team, worker = %name, "Drain proceeding without ack");
    }

    let live_slots = rt
        .transport
        .list_slots(&manifest.transport_session)
        .await
        .unwrap_or_default();
    let panes = rt.panes.read();
    let plan = compute_kill_targets(&manifest, &panes, &live_slots, Some(name));
    for target in &plan.targets {
        rt.transport
            .kill_slot(target, rt.config.shutdown_grace())
            .await?;
    }

    rt.manifest.update(|m| {
        m.workers.retain(|w| w.name != *name);
        m.draining_workers.retain(|n| n != name);
        m.worker_count = m.worker_count.saturating_sub(1);
        m.active_worker_count = m.active_worker_count.saturating_sub(1);
    })?;
    rt.panes.forget_worker(name)?;
    rt.workers.remove(name)?;
    rt.events.append(
        &TeamEvent::new(&rt.team, EventKind::WorkerStopped)
            .with_worker(name)
            .with_reason("scaled_down"),
    )?;
    info!(team = %rt.team, worker = %name, "Worker drained and removed");
    Ok(true)
}

/// Progress drains whose claims have finished; warn about slow ones.
pub async fn complete_drains(rt: &TeamRuntime) -> Result<()> {
    let Some(manifest) = rt.manifest.load() else {
        return Ok(());
    };
    let tasks = rt.tasks.list();

    for name in manifest.draining_workers.clone() {
        let live_claim = tasks.iter().any(|t| {
            t.status == TaskStatus::InProgress
                && t.claim.as_ref().map(|c| c.worker.as_str()) == Some(name.as_str())
        });
        if !live_claim {
            finalize_drain(rt, &name).await?;
            continue;
        }

        // Still working: surface a warning when the drain runs long, once.
        if let Some(status) = rt.workers.read_status(&name) {
            let age = (Utc::now() - status.updated_at).num_milliseconds().max(0) as u64;
            let warned = status.reason.as_deref() == Some(DRAIN_WARNED);
            if age > rt.config.drain_timeout_ms && !warned {
                warn!(team = %rt.team, worker = %name, age_ms = age, "Drain exceeding timeout");
                rt.events.append(
                    &TeamEvent::new(&rt.team, EventKind::WorkerStopped)
                        .with_worker(&name)
                        .with_reason(DRAIN_WARNED),
                )?;
                rt.workers.write_status(
                    &name,
                    &WorkerStatusRecord {
                        state: WorkerState::Draining,
                        current_task_id: status.current_task_id,
                        reason: Some(DRAIN_WARNED.into()),
                        updated_at: status.updated_at,
                    },
                )?;
            }
        }
    }
    Ok(())
}

/// Apply a high-confidence recommendation when auto-apply is on.
///
/// Only recommendations that held for 3 consecutive ticks are acted on, and
/// only after the cooldown has elapsed (enforced inside scale_up /
/// scale_down's shared cooldown stamp).
pub async fn maybe_auto_apply(rt: &TeamRuntime, snapshot: &MonitorSnapshot) -> Result<()> {
    if snapshot.recommendation_streak < 3 {
        return Ok(());
    }
    let Some(recommendation) = snapshot.recommendations.first() else {
        return Ok(());
    };

    match recommendation {
        ScalingRecommendation::ScaleUp { count } => {
            let outcome = scale_up(
                rt,
                *count,
                None,
                ScalingTrigger::Auto,
                &CancellationToken::new(),
            )
            .await?;
            info!(team = %rt.team, ?outcome, "Auto scale-up evaluated");
        }
        ScalingRecommendation::ScaleDown { count } => {
            let outcome = scale_down(
                rt,
                ScaleDownRequest::Count(*count),
                ScalingTrigger::Auto,
            )
            .await?;
            info!(team = %rt.team, ?outcome, "Auto scale-down evaluated");
        }
        ScalingRecommendation::None => {}
    }
    Ok(())
}
