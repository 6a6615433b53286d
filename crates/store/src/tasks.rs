//! Task CRUD, claim leases, dependency readiness, and lease expiry.
//!
//! All mutations use optimistic concurrency on `task.version`: read, mutate
//! in memory, then commit only if the on-disk version is unchanged. One
//! retry on conflict, then the loss is surfaced to the caller.

use std::fs;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use foreman_common::{Result, TaskClaim, TaskRecord, TaskStatus};

use crate::atomic;
use crate::manifest::ManifestStore;
use crate::paths::TeamPaths;

/// Outcome of a claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// Claim succeeded; the returned record carries the fresh claim token.
    Claimed { task: TaskRecord },
    NotFound,
    /// Task is not pending (and not claimable).
    WrongStatus(TaskStatus),
    /// Already claimed, or lost the optimistic-concurrency race.
    Conflict { holder: Option<String> },
    /// One or more dependencies have not completed.
    BlockedDependency { unmet: Vec<String> },
    /// The claiming worker is draining and refuses new claims.
    DrainingWorker,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotFound,
    TokenMismatch,
}

#[derive(Debug)]
pub enum TransitionOutcome {
    Transitioned { task: TaskRecord },
    NotFound,
    WrongStatus(TaskStatus),
    TokenMismatch,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Updated { task: TaskRecord },
    NotFound,
    VersionConflict,
}

/// Result of a dependency-readiness computation. Pure; never mutates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    /// Dependency ids that are not yet completed.
    pub unmet: Vec<String>,
}

/// General-purpose field patch for [`TaskStore::update`].
#[derive(Debug, Default, Clone)]
pub struct TaskPatch {
    pub subject: Option<String>,
    pub description: Option<String>,
    /// Unrestricted status override, for administrative correction.
    pub status: Option<TaskStatus>,
    pub owner: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub depends_on: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    paths: TeamPaths,
    lease_ms: i64,
}

impl TaskStore {
    pub fn new(paths: TeamPaths, lease_ms: i64) -> Self {
        Self { paths, lease_ms }
    }

    /// Create a task, allocating its id from the manifest counter in the
    /// same write window.
    ///
    /// Dependency ids are not validated here: a task may reference a sibling
    /// created later in the same bootstrap batch.
    pub fn create(
        &self,
        manifest: &ManifestStore,
        subject: impl Into<String>,
        description: impl Into<String>,
        depends_on: Vec<String>,
        requires_code_change: bool,
    ) -> Result<TaskRecord> {
        let id = manifest.update(|m| m.allocate_task_id())?;
        let task = TaskRecord::new(id, subject, description)
            .with_depends_on(depends_on)
            .with_requires_code_change(requires_code_change);
        atomic::write_json(&self.paths.task_file(&task.id), &task)?;
        debug!(task = %task.id, subject = %task.subject, "Created task");
        Ok(task)
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        atomic::read_json(&self.paths.task_file(task_id))
    }

    /// All tasks, sorted by numeric id.
    pub fn list(&self) -> Vec<TaskRecord> {
        let dir = self.paths.tasks_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut tasks: Vec<TaskRecord> = entries
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|e| atomic::read_json(&e.path()))
            .collect();
        tasks.sort_by_key(|t| t.id.parse::<u64>().unwrap_or(u64::MAX));
        tasks
    }

    /// Attempt to claim a pending task for `worker`.
    pub fn claim(&self, manifest: &ManifestStore, task_id: &str, worker: &str) -> ClaimOutcome {
        if let Some(m) = manifest.load() {
            if m.is_draining(worker) {
                return ClaimOutcome::DrainingWorker;
            }
        }

        for attempt in 0..2 {
            let Some(task) = self.get(task_id) else {
                return ClaimOutcome::NotFound;
            };

            match task.status {
                TaskStatus::Pending => {}
                TaskStatus::InProgress => {
                    return ClaimOutcome::Conflict {
                        holder: task.claim.map(|c| c.worker),
                    };
                }
                other => return ClaimOutcome::WrongStatus(other),
            }

            let readiness = self.readiness_of(&task);
            if !readiness.ready {
                return ClaimOutcome::BlockedDependency {
                    unmet: readiness.unmet,
                };
            }

            let mut claimed = task.clone();
            claimed.status = TaskStatus::InProgress;
            claimed.owner = Some(worker.to_string());
            claimed.claim = Some(TaskClaim::new(worker, self.lease_ms));
            if self.commit(claimed.clone(), task.version) {
                claimed.version = task.version + 1;
                info!(task = %task_id, worker = %worker, "Task claimed");
                return ClaimOutcome::Claimed { task: claimed };
            }
            debug!(task = %task_id, attempt, "Claim write conflicted, retrying");
        }

        let holder = self.get(task_id).and_then(|t| t.claim).map(|c| c.worker);
        ClaimOutcome::Conflict { holder }
    }

    /// Voluntarily release a claim, returning the task to `pending`.
    pub fn release(&self, task_id: &str, claim_token: &str) -> ReleaseOutcome {
        for _ in 0..2 {
            let Some(task) = self.get(task_id) else {
                return ReleaseOutcome::NotFound;
            };
            match &task.claim {
                Some(claim) if claim.token == claim_token => {}
                _ => return ReleaseOutcome::TokenMismatch,
            }

            let mut released = task.clone();
            released.status = TaskStatus::Pending;
            released.claim = None;
            released.owner = None;
            if self.commit(released, task.version) {
                info!(task = %task_id, "Claim released");
                return ReleaseOutcome::Released;
            }
        }
        ReleaseOutcome::TokenMismatch
    }

    /// Move an in-progress task to a terminal status.
    pub fn transition(
        &self,
        task_id: &str,
        claim_token: &str,
        target: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> TransitionOutcome {
        debug_assert!(target.is_terminal(), "transition targets must be terminal");

        for _ in 0..2 {
            let Some(task) = self.get(task_id) else {
                return TransitionOutcome::NotFound;
            };
            if task.status != TaskStatus::InProgress {
                return TransitionOutcome::WrongStatus(task.status);
            }
            match &task.claim {
                Some(claim) if claim.token == claim_token => {}
                _ => return TransitionOutcome::TokenMismatch,
            }

            let mut done = task.clone();
            done.status = target;
            done.claim = None;
            done.completed_at = Some(Utc::now());
            if result.is_some() {
                done.result = result.clone();
            }
            if error.is_some() {
                done.error = error.clone();
            }
            if self.commit(done.clone(), task.version) {
                done.version = task.version + 1;
                info!(task = %task_id, status = ?target, "Task transitioned");
                return TransitionOutcome::Transitioned { task: done };
            }
        }

        let status = self
            .get(task_id)
            .map(|t| t.status)
            .unwrap_or(TaskStatus::Pending);
        TransitionOutcome::WrongStatus(status)
    }

    /// Apply a field patch under optimistic concurrency.
    pub fn update(&self, task_id: &str, patch: &TaskPatch) -> UpdateOutcome {
        for _ in 0..2 {
            let Some(task) = self.get(task_id) else {
                return UpdateOutcome::NotFound;
            };

            let mut updated = task.clone();
            if let Some(subject) = &patch.subject {
                updated.subject = subject.clone();
            }
            if let Some(description) = &patch.description {
                updated.description = description.clone();
            }
            if let Some(status) = patch.status {
                updated.status = status;
            }
            if let Some(owner) = &patch.owner {
                updated.owner = Some(owner.clone());
            }
            if let Some(result) = &patch.result {
                updated.result = Some(result.clone());
            }
            if let Some(error) = &patch.error {
                updated.error = Some(error.clone());
            }
            if let Some(deps) = &patch.depends_on {
                updated.depends_on = deps.clone();
            }
            if self.commit(updated.clone(), task.version) {
                updated.version = task.version + 1;
                return UpdateOutcome::Updated { task: updated };
            }
        }
        UpdateOutcome::VersionConflict
    }

    /// Dependency readiness for a task id.
    pub fn readiness(&self, task_id: &str) -> Option<Readiness> {
        self.get(task_id).map(|t| self.readiness_of(&t))
    }

    /// Dependency readiness for an already-loaded record.
    pub fn readiness_of(&self, task: &TaskRecord) -> Readiness {
        let unmet: Vec<String> = task
            .depends_on
            .iter()
            .filter(|dep_id| {
                self.get(dep_id)
                    .map(|dep| dep.status != TaskStatus::Completed)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        Readiness {
            ready: unmet.is_empty(),
            unmet,
        }
    }

    /// Rewrite expired in-progress claims back to pending.
    ///
    /// Only claims whose lease has lapsed AND whose holder is in
    /// `dead_workers` are swept; a live worker keeps its lease until it
    /// releases or transitions.
    pub fn expire_leases(&self, now: DateTime<Utc>, dead_workers: &[String]) -> Vec<String> {
        let mut expired = Vec::new();
        for task in self.list() {
            if task.status != TaskStatus::InProgress {
                continue;
            }
            let Some(claim) = &task.claim else {
                continue;
            };
            if !claim.is_expired(now) || !dead_workers.contains(&claim.worker) {
                continue;
            }

            let mut reset = task.clone();
            reset.status = TaskStatus::Pending;
            reset.claim = None;
            reset.owner = None;
            if self.commit(reset, task.version) {
                warn!(
                    task = %task.id,
                    worker = %claim.worker,
                    "Lease expired on dead worker, task returned to pending"
                );
                expired.push(task.id.clone());
            }
        }
        expired
    }

    /// Commit `task` only if the on-disk version still equals `expected`.
    ///
    /// The committed record gets `version = expected + 1`. Best-effort CAS:
    /// the window between the re-read and the rename is accepted, per the
    /// one-retry optimistic-concurrency contract.
    fn commit(&self, mut task: TaskRecord, expected_version: u64) -> bool {
        let path = self.paths.task_file(&task.id);
        let current: Option<TaskRecord> = atomic::read_json(&path);
        if let Some(current) = current {
            if current.version != expected_version {
                return false;
            }
        }
        task.version = expected_version + 1;
        atomic::write_json(&path, &task).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_common::{LeaderIdentity, TeamManifest};
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (ManifestStore, TaskStore) {
        let paths = TeamPaths::new(dir.path(), "t1");
        let manifest = ManifestStore::new(paths.clone());
        manifest
            .save(&TeamManifest::new(
                "t1",
                "test",
                LeaderIdentity {
                    session_id: "s".into(),
                    worker_id: "leader".into(),
                    role: "lead".into(),
                },
                "foreman-t1",
                "executor",
            ))
            .unwrap();
        (manifest, TaskStore::new(paths, 900_000))
    }

    #[test]
    fn test_create_allocates_monotone_ids() {
        let dir = TempDir::new().unwrap();
        let (manifest, tasks) = setup(&dir);
        let t1 = tasks.create(&manifest, "do A", "", vec![], false).unwrap();
        let t2 = tasks.create(&manifest, "do B", "", vec![], false).unwrap();
        assert_eq!(t1.id, "1");
        assert_eq!(t2.id, "2");
        assert_eq!(manifest.load().unwrap().next_task_id, 3);
    }

    #[test]
    fn test_claim_then_conflict() {
        let dir = TempDir::new().unwrap();
        let (manifest, tasks) = setup(&dir);
        let t1 = tasks.create(&manifest, "do A", "", vec![], false).unwrap();

        let outcome = tasks.claim(&manifest, &t1.id, "worker-1");
        let claimed = match outcome {
            ClaimOutcome::Claimed { task } => task,
            other => panic!("expected claim, got {other:?}"),
        };
        assert_eq!(claimed.status, TaskStatus::InProgress);
        assert_eq!(claimed.version, 2);
        assert_eq!(claimed.claim.as_ref().unwrap().worker, "worker-1");

        match tasks.claim(&manifest, &t1.id, "worker-2") {
            ClaimOutcome::Conflict { holder } => {
                assert_eq!(holder.as_deref(), Some("worker-1"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_claim_release_restores_pending() {
        let dir = TempDir::new().unwrap();
        let (manifest, tasks) = setup(&dir);
        let t1 = tasks.create(&manifest, "do A", "", vec![], false).unwrap();

        let claimed = match tasks.claim(&manifest, &t1.id, "worker-1") {
            ClaimOutcome::Claimed { task } => task,
            other => panic!("expected claim, got {other:?}"),
        };
        let token = claimed.claim.unwrap().token;

        assert_eq!(tasks.release(&t1.id, &token), ReleaseOutcome::Released);
        let after = tasks.get(&t1.id).unwrap();
        assert_eq!(after.status, TaskStatus::Pending);
        assert!(after.claim.is_none());
    }

    #[test]
    fn test_release_requires_token() {
        let dir = TempDir::new().unwrap();
        let (manifest, tasks) = setup(&dir);
        let t1 = tasks.create(&manifest, "do A", "", vec![], false).unwrap();
        tasks.claim(&manifest, &t1.id, "worker-1");
        assert_eq!(
            tasks.release(&t1.id, "not-the-token"),
            ReleaseOutcome::TokenMismatch
        );
    }

    #[test]
    fn test_transition_completes() {
        let dir = TempDir::new().unwrap();
        let (manifest, tasks) = setup(&dir);
        let t1 = tasks.create(&manifest, "do A", "", vec![], false).unwrap();
        let claimed = match tasks.claim(&manifest, &t1.id, "worker-1") {
            ClaimOutcome::Claimed { task } => task,
            other => panic!("expected claim, got {other:?}"),
        };
        let token = claimed.claim.unwrap().token;

        let outcome = tasks.transition(
            &t1.id,
            &token,
            TaskStatus::Completed,
            Some("done".into()),
            None,
        );
        let done = match outcome {
            TransitionOutcome::Transitioned { task } => task,
            other => panic!("expected transition, got {other:?}"),
        };
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());
        assert!(done.claim.is_none());
        assert_eq!(done.version, 3);
    }

    #[test]
    fn test_claim_from_draining_worker_rejected() {
        let dir = TempDir::new().unwrap();
        let (manifest, tasks) = setup(&dir);
        let t1 = tasks.create(&manifest, "do A", "", vec![], false).unwrap();
        manifest
            .update(|m| m.draining_workers.push("worker-3".into()))
            .unwrap();
        assert!(matches!(
            tasks.claim(&manifest, &t1.id, "worker-3"),
            ClaimOutcome::DrainingWorker
        ));
    }

    #[test]
    fn test_dependency_readiness_progression() {
        let dir = TempDir::new().unwrap();
        let (manifest, tasks) = setup(&dir);
        let t1 = tasks.create(&manifest, "A", "", vec![], false).unwrap();
        let t2 = tasks.create(&manifest, "B", "", vec![], false).unwrap();
        let t3 = tasks
            .create(&manifest, "C", "", vec![t1.id.clone(), t2.id.clone()], false)
            .unwrap();

        let r = tasks.readiness(&t3.id).unwrap();
        assert!(!r.ready);
        assert_eq!(r.unmet, vec![t1.id.clone(), t2.id.clone()]);

        // Complete T1: still blocked on T2.
        let c1 = match tasks.claim(&manifest, &t1.id, "worker-1") {
            ClaimOutcome::Claimed { task } => task,
            other => panic!("{other:?}"),
        };
        tasks.transition(
            &t1.id,
            &c1.claim.unwrap().token,
            TaskStatus::Completed,
            None,
            None,
        );
        let r = tasks.readiness(&t3.id).unwrap();
        assert!(!r.ready);
        assert_eq!(r.unmet, vec![t2.id.clone()]);

        // Complete T2: ready.
        let c2 = match tasks.claim(&manifest, &t2.id, "worker-1") {
            ClaimOutcome::Claimed { task } => task,
            other => panic!("{other:?}"),
        };
        tasks.transition(
            &t2.id,
            &c2.claim.unwrap().token,
            TaskStatus::Completed,
            None,
            None,
        );
        assert!(tasks.readiness(&t3.id).unwrap().ready);
    }

    #[test]
    fn test_claim_blocked_by_dependency() {
        let dir = TempDir::new().unwrap();
        let (manifest, tasks) = setup(&dir);
        let t1 = tasks.create(&manifest, "A", "", vec![], false).unwrap();
        let t2 = tasks
            .create(&manifest, "B", "", vec![t1.id.clone()], false)
            .unwrap();
        match tasks.claim(&manifest, &t2.id, "worker-1") {
            ClaimOutcome::BlockedDependency { unmet } => assert_eq!(unmet, vec![t1.id]),
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn test_expire_leases_only_for_dead_workers() {
        let dir = TempDir::new().unwrap();
        let paths = TeamPaths::new(dir.path(), "t1");
        let (manifest, _) = setup(&dir);
        // 50ms lease so it lapses immediately for the sweep below.
        let tasks = TaskStore::new(paths, 50);

        let t1 = tasks.create(&manifest, "A", "", vec![], false).unwrap();
        tasks.claim(&manifest, &t1.id, "worker-1");

        let later = Utc::now() + chrono::Duration::milliseconds(100);

        // Holder still alive: lease survives.
        assert!(tasks.expire_leases(later, &[]).is_empty());
        assert_eq!(tasks.get(&t1.id).unwrap().status, TaskStatus::InProgress);

        // Holder observed dead: task returns to pending, version bumps.
        let expired = tasks.expire_leases(later, &["worker-1".to_string()]);
        assert_eq!(expired, vec![t1.id.clone()]);
        let after = tasks.get(&t1.id).unwrap();
        assert_eq!(after.status, TaskStatus::Pending);
        assert!(after.claim.is_none());
        assert_eq!(after.version, 3);

        // Another worker can now claim it.
        assert!(matches!(
            tasks.claim(&manifest, &t1.id, "worker-2"),
            ClaimOutcome::Claimed { .. }
        ));
    }

    #[test]
    fn test_update_patch_bumps_version() {
        let dir = TempDir::new().unwrap();
        let (manifest, tasks) = setup(&dir);
        let t1 = tasks.create(&manifest, "A", "", vec![], false).unwrap();

        let patch = TaskPatch {
            subject: Some("A2".into()),
            owner: Some("worker-1".into()),
            ..Default::default()
        };
        let updated = match tasks.update(&t1.id, &patch) {
            UpdateOutcome::Updated { task } => task,
            other => panic!("{other:?}"),
        };
        assert_eq!(updated.subject, "A2");
        assert_eq!(updated.version, 2);
    }
}
