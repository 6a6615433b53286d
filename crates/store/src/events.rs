//! Append-only NDJSON event log.

use std::fs;

use foreman_common::{Result, TeamEvent};

use crate::atomic;
use crate::paths::TeamPaths;

#[derive(Debug, Clone)]
pub struct EventLog {
    paths: TeamPaths,
}

impl EventLog {
    pub fn new(paths: TeamPaths) -> Self {
        Self { paths }
    }

    pub fn append(&self, event: &TeamEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        atomic::append_line(&self.paths.events_file(), &line)
    }

    /// Read the full log, skipping lines that fail to parse.
    pub fn read_all(&self) -> Vec<TeamEvent> {
        let Ok(content) = fs::read_to_string(self.paths.events_file()) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_common::EventKind;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read_forward() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(TeamPaths::new(dir.path(), "t1"));

        log.append(&TeamEvent::new("t1", EventKind::WorkerIdle).with_worker("worker-1"))
            .unwrap();
        log.append(&TeamEvent::new("t1", EventKind::TaskCompleted).with_task("3"))
            .unwrap();

        let events = log.read_all();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::WorkerIdle);
        assert_eq!(events[1].task_id.as_deref(), Some("3"));
    }

    #[test]
    fn test_corrupt_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let paths = TeamPaths::new(dir.path(), "t1");
        let log = EventLog::new(paths.clone());
        log.append(&TeamEvent::new("t1", EventKind::WorkerIdle)).unwrap();
        atomic::append_line(&paths.events_file(), "garbage line").unwrap();
        log.append(&TeamEvent::new("t1", EventKind::WorkerStopped)).unwrap();

        assert_eq!(log.read_all().len(), 2);
    }
}
