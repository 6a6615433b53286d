//! The panes side-file (`panes.json`).
//!
//! Records every slot address the team has ever owned, keyed by role.
//! Cleanup unions these with the manifest's worker addresses when computing
//! kill targets, so a worker the manifest lost track of can still be
//! reclaimed, and the leader/HUD addresses are always known for exclusion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use foreman_common::Result;

use crate::atomic;
use crate::paths::TeamPaths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanesRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_pane: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hud_pane: Option<String>,

    /// Worker name → slot address.
    #[serde(default)]
    pub worker_panes: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PanesStore {
    paths: TeamPaths,
}

impl PanesStore {
    pub fn new(paths: TeamPaths) -> Self {
        Self { paths }
    }

    pub fn read(&self) -> PanesRecord {
        atomic::read_json(&self.paths.panes_file()).unwrap_or_default()
    }

    pub fn write(&self, record: &PanesRecord) -> Result<()> {
        atomic::write_json(&self.paths.panes_file(), record)
    }

    pub fn record_worker(&self, worker: &str, address: &str) -> Result<()> {
        let mut record = self.read();
        record
            .worker_panes
            .insert(worker.to_string(), address.to_string());
        self.write(&record)
    }

    pub fn forget_worker(&self, worker: &str) -> Result<()> {
        let mut record = self.read();
        if record.worker_panes.remove(worker).is_some() {
            self.write(&record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_and_forget() {
        let dir = TempDir::new().unwrap();
        let panes = PanesStore::new(TeamPaths::new(dir.path(), "t1"));

        panes.record_worker("worker-1", "%2").unwrap();
        panes.record_worker("worker-2", "%3").unwrap();
        assert_eq!(panes.read().worker_panes.len(), 2);

        panes.forget_worker("worker-1").unwrap();
        let record = panes.read();
        assert_eq!(record.worker_panes.len(), 1);
        assert_eq!(record.worker_panes.get("worker-2").unwrap(), "%3");
    }
}
