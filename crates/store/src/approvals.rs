//! Plan-approval decisions, one file per task.

use foreman_common::{ApprovalRecord, EventKind, Result, TeamEvent};

use crate::atomic;
use crate::events::EventLog;
use crate::paths::TeamPaths;

#[derive(Debug, Clone)]
pub struct ApprovalStore {
    paths: TeamPaths,
    events: EventLog,
    team: String,
}

impl ApprovalStore {
    pub fn new(paths: TeamPaths, team: impl Into<String>) -> Self {
        let events = EventLog::new(paths.clone());
        Self {
            paths,
            events,
            team: team.into(),
        }
    }

    /// Persist a decision and log an `approval_decision` event.
    pub fn record(&self, approval: &ApprovalRecord) -> Result<()> {
        atomic::write_json(&self.paths.approval_file(&approval.task_id), approval)?;
        self.events.append(
            &TeamEvent::new(&self.team, EventKind::ApprovalDecision)
                .with_task(&approval.task_id)
                .with_reason(format!("{:?}", approval.decision).to_lowercase()),
        )
    }

    pub fn read(&self, task_id: &str) -> Option<ApprovalRecord> {
        atomic::read_json(&self.paths.approval_file(task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_common::ApprovalDecision;
    use tempfile::TempDir;

    #[test]
    fn test_record_and_read() {
        let dir = TempDir::new().unwrap();
        let paths = TeamPaths::new(dir.path(), "t1");
        let approvals = ApprovalStore::new(paths.clone(), "t1");

        let record = ApprovalRecord::new("3", ApprovalDecision::Approved, "leader");
        approvals.record(&record).unwrap();

        let back = approvals.read("3").unwrap();
        assert_eq!(back.decision, ApprovalDecision::Approved);

        let events = EventLog::new(paths).read_all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::ApprovalDecision);
    }
}
