//! The monitor snapshot: the most recent reconciled view of a team.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scaling::ScalingRecommendation;
use crate::task::{TaskRecord, TaskStatus};
use crate::worker::WorkerState;

/// Coarse team lifecycle label.
///
/// Phases only move forward (`complete` is terminal); `team-fix` is a branch
/// taken from exec/verify when all tasks are terminal but at least one
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamPhase {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "team-prd")]
    Prd,
    #[serde(rename = "team-exec")]
    Exec,
    #[serde(rename = "team-verify")]
    Verify,
    #[serde(rename = "team-fix")]
    Fix,
    #[serde(rename = "complete")]
    Complete,
}

impl TeamPhase {
    /// Ordering rank for the forward-only rule. `Fix` shares Verify's rank
    /// so the fix branch can rejoin verification.
    pub fn rank(self) -> u8 {
        match self {
            Self::Start => 0,
            Self::Prd => 1,
            Self::Exec => 2,
            Self::Verify => 3,
            Self::Fix => 3,
            Self::Complete => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// One recorded phase change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: TeamPhase,
    pub to: TeamPhase,
    pub at: DateTime<Utc>,
}

/// Task counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub blocked: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn tally(tasks: &[TaskRecord]) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Blocked => counts.blocked += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.blocked + self.in_progress + self.completed + self.failed
    }

    /// All tasks terminal (and there is at least one task).
    pub fn all_terminal(&self) -> bool {
        self.total() > 0 && self.pending == 0 && self.blocked == 0 && self.in_progress == 0
    }
}

/// Wall-clock cost of the last monitor tick, by stage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TickTimings {
    pub read_ms: u64,
    pub sweep_ms: u64,
    pub notify_ms: u64,
    pub total_ms: u64,
}

/// The persisted monitor snapshot (`monitor.snapshot.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub team: String,
    pub phase: TeamPhase,

    #[serde(default)]
    pub phase_log: Vec<PhaseTransition>,

    pub task_counts: TaskCounts,

    /// Worker name → observed state.
    #[serde(default)]
    pub worker_states: BTreeMap<String, WorkerState>,

    #[serde(default)]
    pub dead_workers: Vec<String>,

    #[serde(default)]
    pub recommendations: Vec<ScalingRecommendation>,

    /// How many consecutive ticks produced the current recommendation.
    #[serde(default)]
    pub recommendation_streak: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_nudge_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scaling_action_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub timings: TickTimings,

    pub updated_at: DateTime<Utc>,
}

impl MonitorSnapshot {
    pub fn initial(team: impl Into<String>) -> Self {
        Self {
            team: team.into(),
            phase: TeamPhase::Start,
            phase_log: Vec::new(),
            task_counts: TaskCounts::default(),
            worker_states: BTreeMap::new(),
            dead_workers: Vec::new(),
            recommendations: Vec::new(),
            recommendation_streak: 0,
            last_nudge_at: None,
            last_scaling_action_at: None,
            timings: TickTimings::default(),
            updated_at: Utc::now(),
        }
    }

    /// Record a phase change, enforcing the forward-only rule.
    ///
    /// Returns whether the phase actually changed. Backward moves are
    /// ignored, except entering/leaving `team-fix`, which shares rank with
    /// `team-verify`.
    pub fn advance_phase(&mut self, to: TeamPhase) -> bool {
        if to == self.phase || self.phase.is_terminal() {
            return false;
        }
        if to.rank() < self.phase.rank() {
            return false;
        }
        self.phase_log.push(PhaseTransition {
            from: self.phase,
            to,
            at: Utc::now(),
        });
        self.phase = to;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskRecord;

    #[test]
    fn test_phase_wire_names() {
        assert_eq!(
            serde_json::to_string(&TeamPhase::Exec).unwrap(),
            "\"team-exec\""
        );
        assert_eq!(
            serde_json::to_string(&TeamPhase::Complete).unwrap(),
            "\"complete\""
        );
    }

    #[test]
    fn test_phase_only_moves_forward() {
        let mut snap = MonitorSnapshot::initial("t1");
        assert!(snap.advance_phase(TeamPhase::Exec));
        assert!(!snap.advance_phase(TeamPhase::Prd));
        assert_eq!(snap.phase, TeamPhase::Exec);

        assert!(snap.advance_phase(TeamPhase::Fix));
        assert!(snap.advance_phase(TeamPhase::Verify));
        assert!(snap.advance_phase(TeamPhase::Complete));
        assert!(!snap.advance_phase(TeamPhase::Exec));
        assert_eq!(snap.phase, TeamPhase::Complete);
        assert_eq!(snap.phase_log.len(), 4);
    }

    #[test]
    fn test_complete_is_terminal() {
        let mut snap = MonitorSnapshot::initial("t1");
        snap.advance_phase(TeamPhase::Complete);
        assert!(!snap.advance_phase(TeamPhase::Fix));
    }

    #[test]
    fn test_task_counts_tally() {
        let mut done = TaskRecord::new("1", "a", "");
        done.status = TaskStatus::Completed;
        let pending = TaskRecord::new("2", "b", "");
        let counts = TaskCounts::tally(&[done, pending]);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.pending, 1);
        assert!(!counts.all_terminal());
    }
}
