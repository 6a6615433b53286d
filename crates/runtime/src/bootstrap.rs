//! Worker bootstrap: identity, files, slot, readiness, first trigger.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use foreman_common::{
    EventKind, ForemanError, Result, TaskRecord, TeamEvent, WorkerHeartbeat, WorkerIdentity,
    WorkerStatusRecord,
};
use foreman_transport::{SlotSpec, SpawnerConfig};

use crate::runtime::TeamRuntime;

/// Bootstrap one worker into the team's session.
///
/// Follows the fixed order: allocate identity on the manifest, create the
/// worker files, add a slot, heartbeat + status, inbox, spawn command,
/// readiness wait, trigger. A readiness timeout marks the worker failed and
/// returns normally; the team continues without it.
pub async fn bootstrap_worker(
    rt: &TeamRuntime,
    agent_type: &str,
    leader_args: &[String],
    cancel: &CancellationToken,
) -> Result<WorkerIdentity> {
    // 1. Allocate the name and append to workers[] in one manifest write.
    let (index, session) = rt.manifest.update(|m| {
        let index = m.allocate_worker_index();
        m.workers.push(WorkerIdentity::new(index, agent_type, ""));
        m.worker_count += 1;
        m.active_worker_count += 1;
        (index, m.transport_session.clone())
    })?;
    let identity = WorkerIdentity::new(index, agent_type, "");
    let name = identity.name.clone();

    match materialize(rt, identity, agent_type, leader_args, cancel, &session).await {
        Ok(identity) => Ok(identity),
        Err(e) => {
            // Undo the manifest entry; the index itself is never reused.
            let _ = rt.manifest.update(|m| {
                if m.workers.iter().any(|w| w.name == name) {
                    m.workers.retain(|w| w.name != name);
                    m.worker_count = m.worker_count.saturating_sub(1);
                    m.active_worker_count = m.active_worker_count.saturating_sub(1);
                }
            });
            let _ = rt.workers.remove(&name);
            let _ = rt.panes.forget_worker(&name);
            Err(e)
        }
    }
}

/// Steps 2–7: everything after the manifest allocation.
async fn materialize(
    rt: &TeamRuntime,
    mut identity: WorkerIdentity,
    agent_type: &str,
    leader_args: &[String],
    cancel: &CancellationToken,
    session: &str,
) -> Result<WorkerIdentity> {
    let name = identity.name.clone();

    // 2. Worker directory, identity file, empty signal file.
    foreman_store::atomic::ensure_dir(&rt.paths.worker_dir(&name))?;
    rt.workers.write_identity(&identity)?;
    foreman_store::atomic::write_bytes(&rt.paths.shutdown_ack_file(&name), b"")?;

    let spawner_cfg = SpawnerConfig {
        team: rt.team.clone(),
        worker: name.clone(),
        agent_type: agent_type.to_string(),
        shell_rc: std::env::var("FOREMAN_SHELL_RC").ok().map(Into::into),
        leader_args: leader_args.to_vec(),
        model_override: std::env::var("FOREMAN_WORKER_MODEL")
            .ok()
            .filter(|v| !v.is_empty()),
    };

    // 3. Add the slot and record its address everywhere.
    let spec = SlotSpec {
        title: name.clone(),
        cwd: rt.project_root.clone(),
        env: rt.spawner.build_env(&spawner_cfg),
    };
    let address = rt.transport.add_slot(session, &spec).await?;
    identity.slot = address.clone();
    rt.workers.write_identity(&identity)?;
    rt.manifest.update(|m| {
        if let Some(worker) = m.workers.iter_mut().find(|w| w.name == name) {
            worker.slot = address.clone();
        }
    })?;
    rt.panes.record_worker(&name, &address)?;

    // 4. Heartbeat and status.
    let pid = rt.transport.slot_pid(&address).await?.unwrap_or(0);
    rt.workers
        .write_heartbeat(&name, &WorkerHeartbeat::started(pid))?;
    rt.workers.write_status(&name, &WorkerStatusRecord::idle())?;

    // 5. Inbox: instructions overlay plus the current task list.
    let tasks = rt.tasks.list();
    rt.workers
        .write_inbox(&name, &render_inbox(&rt.team, &name, agent_type, &tasks))?;

    // 6. Start the CLI and wait for its prompt.
    let command = rt.spawner.build_command(&spawner_cfg);
    rt.transport.send_text(&address, &command).await?;
    rt.transport.send_submit(&address).await?;

    let ready = wait_ready(rt, &address, cancel).await?;
    if !ready {
        warn!(team = %rt.team, worker = %name, "Worker never reached readiness");
        rt.workers
            .write_status(&name, &WorkerStatusRecord::failed("ready_timeout"))?;
        rt.events.append(
            &TeamEvent::new(&rt.team, EventKind::WorkerStopped)
                .with_worker(&name)
                .with_reason("ready_timeout"),
        )?;
        return Ok(identity);
    }

    // 7. Nudge the CLI to consume its inbox.
    rt.transport
        .send_text(&address, &format!("Read your inbox at workers/{name}/inbox.md and begin."))
        .await?;
    rt.transport.send_submit(&address).await?;

    info!(team = %rt.team, worker = %name, slot = %address, "Worker ready");
    Ok(identity)
}

/// Re-capture every poll interval until the spawner reports readiness.
///
/// Returns `Ok(false)` on timeout; `Err(Cancelled)` if the token fires.
async fn wait_ready(
    rt: &TeamRuntime,
    address: &str,
    cancel: &CancellationToken,
) -> Result<bool> {
    let deadline = tokio::time::Instant::now() + rt.config.ready_timeout();
    let poll = std::time::Duration::from_millis(rt.config.ready_poll_ms);

    while tokio::time::Instant::now() < deadline {
        if cancel.is_cancelled() {
            return Err(ForemanError::Cancelled);
        }
        let capture = rt.transport.capture(address).await.unwrap_or_default();
        if rt.spawner.is_ready(&capture) {
            return Ok(true);
        }
        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = cancel.cancelled() => return Err(ForemanError::Cancelled),
        }
    }
    Ok(false)
}

/// The inbox overlay: worker protocol plus seeded task references.
///
/// Full task bodies stay in the task store; the inbox only carries ids and
/// subjects.
fn render_inbox(team: &str, worker: &str, agent_type: &str, tasks: &[TaskRecord]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {worker} ({team})\n\n"));
    out.push_str(&format!(
        "You are {worker}, a {agent_type} on team {team}.\n\n"
    ));
    out.push_str("## Protocol\n\n");
    out.push_str("- Claim one task at a time from the task store before working on it.\n");
    out.push_str("- Report completion or failure through the task store, then claim the next ready task.\n");
    out.push_str("- When nudged, read your mailbox and mark messages delivered.\n");
    out.push_str("- If a shutdown request appears in your worker directory, acknowledge it and exit cleanly.\n");
    out.push_str("\n## Tasks\n\n");
    if tasks.is_empty() {
        out.push_str("No tasks seeded yet; wait for the leader.\n");
    } else {
        for task in tasks {
            out.push_str(&format!("- [{}] {}\n", task.id, task.subject));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_lists_ids_and_subjects_only() {
        let mut task = TaskRecord::new("1", "do A", "a very long body that stays out");
        task.description = "SECRET-BODY".into();
        let inbox = render_inbox("t1", "worker-1", "executor", &[task]);
        assert!(inbox.contains("- [1] do A"));
        assert!(!inbox.contains("SECRET-BODY"));
        assert!(inbox.contains("## Protocol"));
    }

    #[test]
    fn test_inbox_empty_task_list() {
        let inbox = render_inbox("t1", "worker-1", "executor", &[]);
        assert!(inbox.contains("No tasks seeded yet"));
    }
}
