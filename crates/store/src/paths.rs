//! Canonical path layout for a team's state root.
//!
//! ```text
//! <project>/state/team/<team>/
//!   manifest.v2.json
//!   tasks/<task_id>.json
//!   workers/<worker>/{identity,heartbeat,status}.json
//!   workers/<worker>/inbox.md
//!   workers/<worker>/shutdown-request.json
//!   workers/<worker>/shutdown-ack.json
//!   mailbox/<worker>.json
//!   events.ndjson
//!   approvals/<task_id>.json
//!   panes.json
//!   monitor.snapshot.json
//!   scaling-history.json
//!   scaling.lock
//! ```

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TeamPaths {
    team_root: PathBuf,
}

impl TeamPaths {
    pub fn new(project_root: impl AsRef<Path>, team_name: &str) -> Self {
        Self {
            team_root: state_root(project_root).join(team_name),
        }
    }

    pub fn team_root(&self) -> &Path {
        &self.team_root
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.team_root.join("manifest.v2.json")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.team_root.join("tasks")
    }

    pub fn task_file(&self, task_id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{task_id}.json"))
    }

    pub fn workers_dir(&self) -> PathBuf {
        self.team_root.join("workers")
    }

    pub fn worker_dir(&self, worker: &str) -> PathBuf {
        self.workers_dir().join(worker)
    }

    pub fn identity_file(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker).join("identity.json")
    }

    pub fn heartbeat_file(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker).join("heartbeat.json")
    }

    pub fn status_file(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker).join("status.json")
    }

    pub fn inbox_file(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker).join("inbox.md")
    }

    pub fn shutdown_request_file(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker).join("shutdown-request.json")
    }

    pub fn shutdown_ack_file(&self, worker: &str) -> PathBuf {
        self.worker_dir(worker).join("shutdown-ack.json")
    }

    pub fn mailbox_dir(&self) -> PathBuf {
        self.team_root.join("mailbox")
    }

    pub fn mailbox_file(&self, worker: &str) -> PathBuf {
        self.mailbox_dir().join(format!("{worker}.json"))
    }

    pub fn events_file(&self) -> PathBuf {
        self.team_root.join("events.ndjson")
    }

    pub fn approvals_dir(&self) -> PathBuf {
        self.team_root.join("approvals")
    }

    pub fn approval_file(&self, task_id: &str) -> PathBuf {
        self.approvals_dir().join(format!("{task_id}.json"))
    }

    pub fn panes_file(&self) -> PathBuf {
        self.team_root.join("panes.json")
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.team_root.join("monitor.snapshot.json")
    }

    pub fn scaling_history_file(&self) -> PathBuf {
        self.team_root.join("scaling-history.json")
    }

    pub fn scaling_lock_file(&self) -> PathBuf {
        self.team_root.join("scaling.lock")
    }
}

/// The shared state root for all teams under a project.
pub fn state_root(project_root: impl AsRef<Path>) -> PathBuf {
    project_root.as_ref().join("state").join("team")
}

/// The team index file maintained alongside the team subtrees.
pub fn index_file(project_root: impl AsRef<Path>) -> PathBuf {
    state_root(project_root).join("index.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = TeamPaths::new("/proj", "t1");
        assert_eq!(
            paths.manifest_file(),
            PathBuf::from("/proj/state/team/t1/manifest.v2.json")
        );
        assert_eq!(
            paths.task_file("7"),
            PathBuf::from("/proj/state/team/t1/tasks/7.json")
        );
        assert_eq!(
            paths.heartbeat_file("worker-2"),
            PathBuf::from("/proj/state/team/t1/workers/worker-2/heartbeat.json")
        );
        assert_eq!(
            paths.mailbox_file("worker-2"),
            PathBuf::from("/proj/state/team/t1/mailbox/worker-2.json")
        );
        assert_eq!(
            index_file("/proj"),
            PathBuf::from("/proj/state/team/index.json")
        );
    }

    #[test]
    fn test_request_and_ack_are_sibling_files() {
        let paths = TeamPaths::new("/proj", "t1");
        let req = paths.shutdown_request_file("worker-1");
        let ack = paths.shutdown_ack_file("worker-1");
        assert_eq!(req.parent(), ack.parent());
        assert_ne!(req, ack);
    }
}
