//! Scaling event history (`scaling-history.json`).
//!
//! A single JSON array, FIFO-evicted at 100 entries.

use foreman_common::{Result, ScalingEvent};

use crate::atomic;
use crate::paths::TeamPaths;

const MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone)]
pub struct ScalingHistory {
    paths: TeamPaths,
}

impl ScalingHistory {
    pub fn new(paths: TeamPaths) -> Self {
        Self { paths }
    }

    pub fn append(&self, event: ScalingEvent) -> Result<()> {
        let mut history = self.read_all();
        history.push(event);
        if history.len() > MAX_ENTRIES {
            let excess = history.len() - MAX_ENTRIES;
            history.drain(0..excess);
        }
        atomic::write_json(&self.paths.scaling_history_file(), &history)
    }

    pub fn read_all(&self) -> Vec<ScalingEvent> {
        atomic::read_json(&self.paths.scaling_history_file()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foreman_common::{ResourceSnapshot, ScalingAction, ScalingTrigger};
    use tempfile::TempDir;

    fn event(reason: &str) -> ScalingEvent {
        ScalingEvent {
            timestamp: Utc::now(),
            action: ScalingAction::Recommendation,
            trigger: ScalingTrigger::Auto,
            workers_added: None,
            workers_removed: None,
            reason: reason.to_string(),
            resource_snapshot: ResourceSnapshot::default(),
        }
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let history = ScalingHistory::new(TeamPaths::new(dir.path(), "t1"));
        history.append(event("first")).unwrap();
        history.append(event("second")).unwrap();
        let all = history.read_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].reason, "first");
    }

    #[test]
    fn test_fifo_eviction_at_cap() {
        let dir = TempDir::new().unwrap();
        let history = ScalingHistory::new(TeamPaths::new(dir.path(), "t1"));
        for i in 0..105 {
            history.append(event(&format!("e{i}"))).unwrap();
        }
        let all = history.read_all();
        assert_eq!(all.len(), 100);
        assert_eq!(all[0].reason, "e5");
        assert_eq!(all[99].reason, "e104");
    }
}
