//! Plan-approval decisions (`approvals/<task_id>.json`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// A persisted approval decision for a task's plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub task_id: String,
    pub decision: ApprovalDecision,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub decided_by: String,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRecord {
    pub fn new(
        task_id: impl Into<String>,
        decision: ApprovalDecision,
        decided_by: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            decision,
            reason: None,
            decided_by: decided_by.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
