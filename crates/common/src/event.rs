//! Append-only team event log entries (`events.ndjson`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a team event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCompleted,
    WorkerIdle,
    WorkerStopped,
    MessageReceived,
    ShutdownAck,
    ApprovalDecision,
    TeamLeaderNudge,
}

/// A single event-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamEvent {
    pub event_id: String,
    pub team: String,

    #[serde(rename = "type")]
    pub kind: EventKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl TeamEvent {
    pub fn new(team: impl Into<String>, kind: EventKind) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            team: team.into(),
            kind,
            worker: None,
            task_id: None,
            message_id: None,
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_wire_names() {
        let json = serde_json::to_string(&EventKind::TeamLeaderNudge).unwrap();
        assert_eq!(json, "\"team_leader_nudge\"");
    }

    #[test]
    fn test_event_builder() {
        let e = TeamEvent::new("t1", EventKind::WorkerStopped)
            .with_worker("worker-2")
            .with_reason("ready_timeout");
        assert_eq!(e.worker.as_deref(), Some("worker-2"));
        assert_eq!(e.reason.as_deref(), Some("ready_timeout"));
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"type\":\"worker_stopped\""));
    }
}
