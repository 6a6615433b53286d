//! Per-worker files: identity, heartbeat, status, inbox.
//!
//! Also hosts the observed-dead predicate used for lease expiry, scale-in
//! safety, and failure reporting. Observed-dead never mutates task state by
//! itself.

use chrono::{Duration, Utc};

use foreman_common::{Result, WorkerHeartbeat, WorkerIdentity, WorkerStatusRecord};

use crate::atomic;
use crate::paths::TeamPaths;

#[derive(Debug, Clone)]
pub struct WorkerStore {
    paths: TeamPaths,
}

impl WorkerStore {
    pub fn new(paths: TeamPaths) -> Self {
        Self { paths }
    }

    pub fn write_identity(&self, identity: &WorkerIdentity) -> Result<()> {
        atomic::write_json(&self.paths.identity_file(&identity.name), identity)
    }

    pub fn read_identity(&self, worker: &str) -> Option<WorkerIdentity> {
        atomic::read_json(&self.paths.identity_file(worker))
    }

    pub fn write_heartbeat(&self, worker: &str, heartbeat: &WorkerHeartbeat) -> Result<()> {
        atomic::write_json(&self.paths.heartbeat_file(worker), heartbeat)
    }

    pub fn read_heartbeat(&self, worker: &str) -> Option<WorkerHeartbeat> {
        atomic::read_json(&self.paths.heartbeat_file(worker))
    }

    /// Record an observed output event on the worker's heartbeat.
    pub fn touch_heartbeat(&self, worker: &str) -> Result<()> {
        if let Some(mut hb) = self.read_heartbeat(worker) {
            hb.tick();
            self.write_heartbeat(worker, &hb)?;
        }
        Ok(())
    }

    /// Flip `alive` off, preserving the record until cleanup.
    pub fn mark_dead(&self, worker: &str) -> Result<()> {
        if let Some(mut hb) = self.read_heartbeat(worker) {
            if hb.alive {
                hb.alive = false;
                self.write_heartbeat(worker, &hb)?;
            }
        }
        Ok(())
    }

    pub fn write_status(&self, worker: &str, status: &WorkerStatusRecord) -> Result<()> {
        atomic::write_json(&self.paths.status_file(worker), status)
    }

    pub fn read_status(&self, worker: &str) -> Option<WorkerStatusRecord> {
        atomic::read_json(&self.paths.status_file(worker))
    }

    pub fn write_inbox(&self, worker: &str, content: &str) -> Result<()> {
        atomic::write_bytes(&self.paths.inbox_file(worker), content.as_bytes())
    }

    /// Remove a worker's subtree (used when a drained worker is removed).
    pub fn remove(&self, worker: &str) -> Result<()> {
        let dir = self.paths.worker_dir(worker);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Signal-0 probe: is the pid still live?
pub fn pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // A cast through pid_t must stay a positive process id; 0 and
        // out-of-range values would address process groups instead.
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // kill(pid, 0) probes without signaling; ESRCH means gone.
        unsafe { libc::kill(pid, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// The observed-dead predicate.
///
/// A worker is observed dead when its pid probe fails, when its heartbeat is
/// older than the inactivity ceiling with a failed pid probe, or when its
/// transport slot is no longer listed in the session.
pub fn is_observed_dead(
    heartbeat: Option<&WorkerHeartbeat>,
    slot_listed: bool,
    inactivity_ceiling_ms: u64,
) -> bool {
    if !slot_listed {
        return true;
    }
    let Some(hb) = heartbeat else {
        // No heartbeat yet: bootstrap in progress, give it the benefit.
        return false;
    };
    if !hb.alive {
        return true;
    }
    if !pid_alive(hb.pid) {
        return true;
    }
    let stale = Utc::now() - hb.last_turn_at > Duration::milliseconds(inactivity_ceiling_ms as i64);
    stale && !pid_alive(hb.pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_heartbeat_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = WorkerStore::new(TeamPaths::new(dir.path(), "t1"));

        store
            .write_heartbeat("worker-1", &WorkerHeartbeat::started(std::process::id()))
            .unwrap();
        store.touch_heartbeat("worker-1").unwrap();
        store.touch_heartbeat("worker-1").unwrap();

        let hb = store.read_heartbeat("worker-1").unwrap();
        assert_eq!(hb.turn_count, 2);
        assert!(hb.alive);

        store.mark_dead("worker-1").unwrap();
        let hb = store.read_heartbeat("worker-1").unwrap();
        assert!(!hb.alive);
        // Record survives death until cleanup.
        assert_eq!(hb.turn_count, 2);
    }

    #[test]
    fn test_pid_probe_self_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn test_observed_dead_missing_slot() {
        let hb = WorkerHeartbeat::started(std::process::id());
        assert!(is_observed_dead(Some(&hb), false, 60_000));
        assert!(!is_observed_dead(Some(&hb), true, 60_000));
    }

    #[test]
    fn test_observed_dead_gone_pid() {
        // An out-of-range pid can never be probed, so the worker reads dead.
        let mut hb = WorkerHeartbeat::started(u32::MAX - 1);
        assert!(is_observed_dead(Some(&hb), true, 60_000));

        hb.alive = false;
        assert!(is_observed_dead(Some(&hb), true, 60_000));
    }

    #[test]
    fn test_no_heartbeat_is_not_dead() {
        assert!(!is_observed_dead(None, true, 60_000));
    }

    #[test]
    fn test_inbox_write() {
        let dir = TempDir::new().unwrap();
        let store = WorkerStore::new(TeamPaths::new(dir.path(), "t1"));
        store.write_inbox("worker-1", "# Inbox\n\n- task 1\n").unwrap();
        let content =
            std::fs::read_to_string(TeamPaths::new(dir.path(), "t1").inbox_file("worker-1"))
                .unwrap();
        assert!(content.starts_with("# Inbox"));
    }
}
