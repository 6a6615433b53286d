//! Task records and claim leases.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A leased reservation of a task by a worker.
///
/// A task has a claim iff its status is `in_progress`. The token is opaque;
/// release and transition require it to match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskClaim {
    pub token: String,
    pub worker: String,
    pub acquired_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
}

impl TaskClaim {
    pub fn new(worker: impl Into<String>, lease_ms: i64) -> Self {
        let now = Utc::now();
        Self {
            token: ulid::Ulid::new().to_string(),
            worker: worker.into(),
            acquired_at: now,
            lease_expires_at: now + Duration::milliseconds(lease_ms),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at < now
    }
}

/// A persisted task (`tasks/<id>.json`).
///
/// `version` is the optimistic-concurrency token: it increments on every
/// persisted mutation, and writers only commit when the on-disk version still
/// matches the one they read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Team-unique monotone id, allocated from the manifest counter.
    pub id: String,

    /// One-line summary.
    pub subject: String,

    /// Full description.
    pub description: String,

    pub status: TaskStatus,

    /// Hint that completing this task is expected to change code.
    #[serde(default)]
    pub requires_code_change: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Ids of tasks that must complete before this one is ready.
    #[serde(default)]
    pub depends_on: Vec<String>,

    pub version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<TaskClaim>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            requires_code_change: false,
            owner: None,
            result: None,
            error: None,
            depends_on: Vec::new(),
            version: 1,
            claim: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn with_depends_on(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    pub fn with_requires_code_change(mut self, value: bool) -> Self {
        self.requires_code_change = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_pending_v1() {
        let t = TaskRecord::new("1", "do A", "details");
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.version, 1);
        assert!(t.claim.is_none());
    }

    #[test]
    fn test_claim_expiry() {
        let claim = TaskClaim::new("worker-1", 50);
        assert!(!claim.is_expired(Utc::now()));
        assert!(claim.is_expired(Utc::now() + Duration::milliseconds(100)));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
