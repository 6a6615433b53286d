//! Best-effort team index (`state/team/index.json`).
//!
//! Maintained on start and cleanup so the CLI can suggest known team names
//! when an unknown one is given. Losing it is harmless; the per-team
//! manifests remain the source of truth.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use foreman_common::Result;

use crate::atomic;
use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamIndexEntry {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TeamIndex {
    file: PathBuf,
}

impl TeamIndex {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            file: paths::index_file(project_root),
        }
    }

    pub fn list(&self) -> Vec<TeamIndexEntry> {
        atomic::read_json(&self.file).unwrap_or_default()
    }

    pub fn add(&self, team: &str) -> Result<()> {
        let mut entries = self.list();
        if !entries.iter().any(|e| e.name == team) {
            entries.push(TeamIndexEntry {
                name: team.to_string(),
                created_at: Utc::now(),
            });
            atomic::write_json(&self.file, &entries)?;
        }
        Ok(())
    }

    pub fn remove(&self, team: &str) -> Result<()> {
        let mut entries = self.list();
        let before = entries.len();
        entries.retain(|e| e.name != team);
        if entries.len() != before {
            atomic::write_json(&self.file, &entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_add_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let index = TeamIndex::new(dir.path());
        index.add("t1").unwrap();
        index.add("t1").unwrap();
        index.add("t2").unwrap();
        assert_eq!(index.list().len(), 2);

        index.remove("t1").unwrap();
        let names: Vec<_> = index.list().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["t2"]);
    }
}
