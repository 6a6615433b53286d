//! Team shutdown and cleanup.
//!
//! The kill path is deliberately narrow: a slot is only ever killed when its
//! address is both known to the team (manifest workers or the panes
//! side-file) and live in the transport session, and the leader/HUD
//! addresses are excluded unconditionally. Anything else in the session is
//! foreign and untouchable.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use foreman_common::{
    AckStatus, EventKind, ForemanError, Result, TaskStatus, TeamEvent, TeamManifest, WorkerState,
    WorkerStatusRecord,
};
use foreman_store::{PanesRecord, TeamIndex};

use crate::runtime::TeamRuntime;

/// The computed kill plan: targets plus exclusion accounting.
#[derive(Debug, Clone, Serialize)]
pub struct KillPlan {
    /// Deduplicated addresses inside KnownIdentity ∩ LiveSession.
    pub targets: Vec<String>,
    pub excluded_leader: usize,
    pub excluded_hud: usize,
    /// Live addresses with no known identity (never targeted).
    pub excluded_foreign: usize,
}

/// Structured result of a shutdown/cleanup, printed as JSON by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupSummary {
    pub targets: TargetSummary,
    pub excluded: ExclusionSummary,
    pub killed: usize,
    pub acks: AckSummary,
    pub session_destroyed: bool,
    pub state_removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub deduped_total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExclusionSummary {
    pub leader: usize,
    pub hud: usize,
    pub foreign: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AckSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub timed_out: usize,
}

/// Outcome of a shutdown attempt.
#[derive(Debug)]
pub enum ShutdownOutcome {
    Completed(CleanupSummary),
    /// Graceful gate not satisfied; nothing was touched.
    GateBlocked { active_workers: Vec<String> },
    /// One or more workers explicitly rejected the request (graceful mode).
    Rejected { workers: Vec<String> },
}

/// Compute kill targets for some or all workers.
///
/// `only` restricts the known set to a single worker's addresses (used by
/// scale-down). Exclusion counts report leader/HUD addresses that were
/// known, and live addresses with no identity.
pub fn compute_kill_targets(
    manifest: &TeamManifest,
    panes: &PanesRecord,
    live_slots: &[String],
    only: Option<&str>,
) -> KillPlan {
    let mut protected = BTreeSet::new();
    protected.extend(manifest.leader_pane.iter().cloned());
    protected.extend(manifest.hud_pane.iter().cloned());
    protected.extend(panes.leader_pane.iter().cloned());
    protected.extend(panes.hud_pane.iter().cloned());

    let mut known = BTreeSet::new();
    for worker in &manifest.workers {
        if only.map(|name| name == worker.name).unwrap_or(true) && !worker.slot.is_empty() {
            known.insert(worker.slot.clone());
        }
    }
    for (name, address) in &panes.worker_panes {
        if only.map(|o| o == name).unwrap_or(true) {
            known.insert(address.clone());
        }
    }

    let mut targets = Vec::new();
    for address in &known {
        if protected.contains(address) || !live_slots.iter().any(|l| l == address) {
            continue;
        }
        if !targets.contains(address) {
            targets.push(address.clone());
        }
    }

    let excluded_foreign = live_slots
        .iter()
        .filter(|l| !known.contains(*l) && !protected.contains(*l))
        .count();

    KillPlan {
        targets,
        excluded_leader: usize::from(
            manifest.leader_pane.is_some() || panes.leader_pane.is_some(),
        ),
        excluded_hud: usize::from(manifest.hud_pane.is_some() || panes.hud_pane.is_some()),
        excluded_foreign,
    }
}

/// Whether the graceful-shutdown gate is satisfied.
///
/// Default gate: every worker is idle/done/failed, or draining with no live
/// claim.
fn gate_blockers(rt: &TeamRuntime, manifest: &TeamManifest) -> Vec<String> {
    let tasks = rt.tasks.list();
    let mut blocking = Vec::new();
    for worker in &manifest.workers {
        let state = rt
            .workers
            .read_status(&worker.name)
            .map(|s| s.state)
            .unwrap_or(WorkerState::Unknown);
        let live_claim = tasks.iter().any(|t| {
            t.status == TaskStatus::InProgress
                && t.claim.as_ref().map(|c| c.worker.as_str()) == Some(worker.name.as_str())
        });
        let draining_done =
            (state == WorkerState::Draining || manifest.is_draining(&worker.name)) && !live_claim;
        if !state.is_inactive() && !draining_done {
            blocking.push(worker.name.clone());
        }
    }
    blocking
}

/// Graceful (or forced) team shutdown.
pub async fn shutdown_team(
    rt: &TeamRuntime,
    force: bool,
    preserve_state: bool,
    cancel: &CancellationToken,
) -> Result<ShutdownOutcome> {
    let manifest = rt.load_manifest()?;

    if !force {
        let blocking = gate_blockers(rt, &manifest);
        if !blocking.is_empty() {
            return Ok(ShutdownOutcome::GateBlocked {
                active_workers: blocking,
            });
        }
    }

    let live_slots = rt
        .transport
        .list_slots(&manifest.transport_session)
        .await
        .unwrap_or_default();

    // Write every request before reading any ack.
    let mut request_times: HashMap<String, DateTime<Utc>> = HashMap::new();
    for worker in &manifest.workers {
        let live = !worker.slot.is_empty() && live_slots.iter().any(|l| l == &worker.slot);
        if live {
            let request = rt.signals.request_shutdown(&worker.name, "leader")?;
            request_times.insert(worker.name.clone(), request.requested_at);
        }
    }

    // Poll for fresh acks within the grace budget.
    let mut acks = AckSummary::default();
    let mut rejected_workers = Vec::new();
    let mut resolved: BTreeSet<String> = BTreeSet::new();
    let deadline = tokio::time::Instant::now() + rt.config.shutdown_grace();
    while resolved.len() < request_times.len() && tokio::time::Instant::now() < deadline {
        if cancel.is_cancelled() {
            return Err(ForemanError::Cancelled);
        }
        for (worker, requested_at) in &request_times {
            if resolved.contains(worker) {
                continue;
            }
            if let Some(ack) = rt.signals.read_ack_with_min(worker, *requested_at) {
                resolved.insert(worker.clone());
                rt.events.append(
                    &TeamEvent::new(&rt.team, EventKind::ShutdownAck)
                        .with_worker(worker)
                        .with_reason(match ack.status {
                            AckStatus::Accept => "accept".to_string(),
                            AckStatus::Reject => {
                                format!("reject: {}", ack.reason.as_deref().unwrap_or(""))
                            }
                        }),
                )?;
                match ack.status {
                    AckStatus::Accept => acks.accepted += 1,
                    AckStatus::Reject => {
                        acks.rejected += 1;
                        rejected_workers.push(worker.clone());
                    }
                }
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
    acks.timed_out = request_times.len() - resolved.len();

    // In graceful mode a rejection stops the teardown of that worker.
    let killable: Vec<String> = manifest
        .workers
        .iter()
        .map(|w| w.name.clone())
        .filter(|name| force || !rejected_workers.contains(name))
        .collect();

    let panes = rt.panes.read();
    let plan = compute_kill_targets(&manifest, &panes, &live_slots, None);
    let mut killed = 0;
    for target in &plan.targets {
        let owner = manifest
            .workers
            .iter()
            .find(|w| w.slot == *target)
            .map(|w| w.name.clone())
            .or_else(|| {
                panes
                    .worker_panes
                    .iter()
                    .find(|(_, a)| *a == target)
                    .map(|(n, _)| n.clone())
            });
        if let Some(owner) = &owner {
            if !killable.contains(owner) {
                continue;
            }
        }
        rt.transport
            .kill_slot(target, rt.config.shutdown_grace())
            .await?;
        killed += 1;
        if let Some(owner) = owner {
            rt.workers.mark_dead(&owner)?;
            rt.workers.write_status(
                &owner,
                &WorkerStatusRecord {
                    state: WorkerState::Done,
                    current_task_id: None,
                    reason: Some("shutdown".into()),
                    updated_at: Utc::now(),
                },
            )?;
        }
    }

    if !force && !rejected_workers.is_empty() {
        warn!(team = %rt.team, workers = ?rejected_workers, "Shutdown rejected by workers");
        return Ok(ShutdownOutcome::Rejected {
            workers: rejected_workers,
        });
    }

    // All workers down: tear down the session and, normally, the state.
    let session_destroyed = rt
        .transport
        .destroy_session(&manifest.transport_session)
        .await
        .is_ok();
    let state_removed = if preserve_state {
        false
    } else {
        let removed = std::fs::remove_dir_all(rt.paths.team_root()).is_ok();
        let _ = TeamIndex::new(&rt.project_root).remove(&rt.team);
        removed
    };

    info!(team = %rt.team, killed, session_destroyed, state_removed, "Team shut down");
    Ok(ShutdownOutcome::Completed(CleanupSummary {
        targets: TargetSummary {
            deduped_total: plan.targets.len(),
        },
        excluded: ExclusionSummary {
            leader: plan.excluded_leader,
            hud: plan.excluded_hud,
            foreign: plan.excluded_foreign,
        },
        killed,
        acks,
        session_destroyed,
        state_removed,
    }))
}

/// Forced cleanup: safe after a crash, skips the gate and the rendezvous.
pub async fn cleanup_team(rt: &TeamRuntime) -> Result<CleanupSummary> {
    let manifest = rt.manifest.load();
    let panes = rt.panes.read();

    let (plan, session_destroyed, killed) = match &manifest {
        Some(manifest) => {
            let live_slots = rt
                .transport
                .list_slots(&manifest.transport_session)
                .await
                .unwrap_or_default();
            let plan = compute_kill_targets(manifest, &panes, &live_slots, None);
            let mut killed = 0;
            for target in &plan.targets {
                if rt
                    .transport
                    .kill_slot(target, rt.config.shutdown_grace())
                    .await
                    .is_ok()
                {
                    killed += 1;
                }
            }
            let destroyed = rt
                .transport
                .destroy_session(&manifest.transport_session)
                .await
                .is_ok();
            (plan, destroyed, killed)
        }
        None => (
            KillPlan {
                targets: Vec::new(),
                excluded_leader: 0,
                excluded_hud: 0,
                excluded_foreign: 0,
            },
            false,
            0,
        ),
    };

    let state_removed = std::fs::remove_dir_all(rt.paths.team_root()).is_ok();
    let _ = TeamIndex::new(&rt.project_root).remove(&rt.team);

    info!(team = %rt.team, killed, state_removed, "Cleanup finished");
    Ok(CleanupSummary {
        targets: TargetSummary {
            deduped_total: plan.targets.len(),
        },
        excluded: ExclusionSummary {
            leader: plan.excluded_leader,
            hud: plan.excluded_hud,
            foreign: plan.excluded_foreign,
        },
        killed,
        acks: AckSummary::default(),
        session_destroyed,
        state_removed,
    })
}
