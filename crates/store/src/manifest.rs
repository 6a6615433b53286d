//! Manifest persistence.
//!
//! Counter allocation (task ids, worker indexes) goes through [`update`],
//! which performs a read, a mutation, and one atomic rewrite, so counters
//! are read, incremented, and written in a single write window.

use foreman_common::{ForemanError, Result, TeamManifest};

use crate::atomic;
use crate::paths::TeamPaths;

#[derive(Debug, Clone)]
pub struct ManifestStore {
    paths: TeamPaths,
}

impl ManifestStore {
    pub fn new(paths: TeamPaths) -> Self {
        Self { paths }
    }

    pub fn exists(&self) -> bool {
        self.paths.manifest_file().exists()
    }

    pub fn load(&self) -> Option<TeamManifest> {
        atomic::read_json(&self.paths.manifest_file())
    }

    pub fn save(&self, manifest: &TeamManifest) -> Result<()> {
        atomic::write_json(&self.paths.manifest_file(), manifest)
    }

    /// Read-modify-write the manifest in one atomic rewrite.
    ///
    /// Returns the closure's value. Fails with `TeamNotFound` when no
    /// manifest exists yet.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut TeamManifest) -> R) -> Result<R> {
        let mut manifest = self
            .load()
            .ok_or_else(|| ForemanError::TeamNotFound(self.team_name_hint()))?;
        let result = mutate(&mut manifest);
        self.save(&manifest)?;
        Ok(result)
    }

    fn team_name_hint(&self) -> String {
        self.paths
            .team_root()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<unknown>".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_common::LeaderIdentity;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ManifestStore {
        ManifestStore::new(TeamPaths::new(dir.path(), "t1"))
    }

    fn manifest() -> TeamManifest {
        TeamManifest::new(
            "t1",
            "build the thing",
            LeaderIdentity {
                session_id: "s".into(),
                worker_id: "leader".into(),
                role: "lead".into(),
            },
            "foreman-t1",
            "executor",
        )
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).load().is_none());
    }

    #[test]
    fn test_update_single_write_window() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&manifest()).unwrap();

        let id = store.update(|m| m.allocate_task_id()).unwrap();
        assert_eq!(id, "1");
        assert_eq!(store.load().unwrap().next_task_id, 2);
    }

    #[test]
    fn test_update_missing_team() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir).update(|_| ()).unwrap_err();
        assert!(matches!(err, ForemanError::TeamNotFound(_)));
    }
}
