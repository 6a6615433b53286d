//! Worker identity, heartbeat, and status records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A worker's stable identity (`workers/<name>/identity.json`).
///
/// A removed worker's name and index are never reassigned within the same
/// team session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerIdentity {
    /// `worker-<index>`.
    pub name: String,

    /// Monotone allocation index, unique for the team's lifetime.
    pub index: u64,

    /// Agent type slug (e.g. "executor", "reviewer").
    pub role: String,

    /// Opaque transport slot address, supplied by the transport.
    pub slot: String,
}

impl WorkerIdentity {
    pub fn new(index: u64, role: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            name: format!("worker-{index}"),
            index,
            role: role.into(),
            slot: slot.into(),
        }
    }
}

/// Per-worker liveness record (`workers/<name>/heartbeat.json`).
///
/// Updated on every observed output event; preserved with `alive = false`
/// after process death until cleanup removes the subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub pid: u32,
    pub last_turn_at: DateTime<Utc>,
    pub turn_count: u64,
    pub alive: bool,
}

impl WorkerHeartbeat {
    pub fn started(pid: u32) -> Self {
        Self {
            pid,
            last_turn_at: Utc::now(),
            turn_count: 0,
            alive: true,
        }
    }

    /// Record an observed output event.
    pub fn tick(&mut self) {
        self.last_turn_at = Utc::now();
        self.turn_count += 1;
    }
}

/// Coarse worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Working,
    Blocked,
    Done,
    Failed,
    Draining,
    Unknown,
}

impl WorkerState {
    /// States that satisfy the graceful-shutdown gate.
    pub fn is_inactive(self) -> bool {
        matches!(self, Self::Idle | Self::Done | Self::Failed)
    }
}

/// Per-worker status record (`workers/<name>/status.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusRecord {
    pub state: WorkerState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl WorkerStatusRecord {
    pub fn idle() -> Self {
        Self {
            state: WorkerState::Idle,
            current_task_id: None,
            reason: None,
            updated_at: Utc::now(),
        }
    }

    pub fn working(task_id: impl Into<String>) -> Self {
        Self {
            state: WorkerState::Working,
            current_task_id: Some(task_id.into()),
            reason: None,
            updated_at: Utc::now(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: WorkerState::Failed,
            current_task_id: None,
            reason: Some(reason.into()),
            updated_at: Utc::now(),
        }
    }

    pub fn draining() -> Self {
        Self {
            state: WorkerState::Draining,
            current_task_id: None,
            reason: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_name_follows_index() {
        let w = WorkerIdentity::new(7, "executor", "%12");
        assert_eq!(w.name, "worker-7");
        assert_eq!(w.index, 7);
    }

    #[test]
    fn test_heartbeat_tick() {
        let mut hb = WorkerHeartbeat::started(1234);
        assert_eq!(hb.turn_count, 0);
        hb.tick();
        hb.tick();
        assert_eq!(hb.turn_count, 2);
        assert!(hb.alive);
    }

    #[test]
    fn test_inactive_states() {
        assert!(WorkerState::Idle.is_inactive());
        assert!(WorkerState::Done.is_inactive());
        assert!(WorkerState::Failed.is_inactive());
        assert!(!WorkerState::Working.is_inactive());
        assert!(!WorkerState::Draining.is_inactive());
    }
}
