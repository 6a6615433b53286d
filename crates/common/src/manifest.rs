//! The team manifest: the authoritative per-team record of identities,
//! policy, and counters.
//!
//! Exactly one manifest exists per team (`manifest.v2.json`). Counter fields
//! (`next_task_id`, `next_worker_index`) are only ever read, incremented, and
//! written back in a single atomic rewrite, so they are non-decreasing across
//! every successful write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scaling::ScalingPolicy;
use crate::worker::WorkerIdentity;

/// Current manifest schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Identity of the leader session that owns the team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderIdentity {
    pub session_id: String,
    pub worker_id: String,
    pub role: String,
}

/// How worker slots are presented to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    SplitPane,
    Auto,
}

impl Default for DisplayMode {
    fn default() -> Self {
        Self::Auto
    }
}

/// Team-level behavioral policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamPolicy {
    /// Leader only delegates; it never claims tasks itself.
    #[serde(default)]
    pub delegation_only: bool,

    /// Workers must have plans approved before code-changing tasks.
    #[serde(default)]
    pub plan_approval_required: bool,

    /// Cleanup refuses to run while any worker is still active.
    #[serde(default = "default_true")]
    pub cleanup_requires_all_workers_inactive: bool,

    #[serde(default)]
    pub display_mode: DisplayMode,

    #[serde(default)]
    pub nested_teams_allowed: bool,

    #[serde(default = "default_true")]
    pub one_team_per_leader_session: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TeamPolicy {
    fn default() -> Self {
        Self {
            delegation_only: false,
            plan_approval_required: false,
            cleanup_requires_all_workers_inactive: true,
            display_mode: DisplayMode::default(),
            nested_teams_allowed: false,
            one_team_per_leader_session: true,
        }
    }
}

/// Snapshot of the permission posture workers inherit at spawn time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsSnapshot {
    #[serde(default)]
    pub approval_mode: String,
    #[serde(default)]
    pub sandbox_mode: String,
    #[serde(default)]
    pub network_access: bool,
}

/// Resource floor/ceiling consulted before scale-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_cpu_percent: f64,
    pub min_free_mem_mb: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_cpu_percent: 80.0,
            min_free_mem_mb: 512,
        }
    }
}

/// The per-team manifest (`manifest.v2.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamManifest {
    pub schema_version: u32,

    /// Team name (slug).
    pub team_name: String,

    /// The overall task the team was started for.
    pub task_description: String,

    pub leader: LeaderIdentity,

    #[serde(default)]
    pub policy: TeamPolicy,

    #[serde(default)]
    pub permissions: PermissionsSnapshot,

    /// Opaque transport session handle (tmux session name or process group).
    pub transport_session: String,

    /// Agent type new workers default to when none is given.
    pub default_agent_type: String,

    pub worker_count: usize,
    pub initial_worker_count: usize,
    pub active_worker_count: usize,

    #[serde(default)]
    pub workers: Vec<WorkerIdentity>,

    /// Names of workers currently draining (refused new claims).
    #[serde(default)]
    pub draining_workers: Vec<String>,

    #[serde(default)]
    pub scaling: ScalingPolicy,

    #[serde(default)]
    pub resource_limits: ResourceLimits,

    /// Next task id to allocate. Monotone.
    pub next_task_id: u64,

    /// Next worker index to allocate. Monotone, never reused.
    pub next_worker_index: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_pane: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hud_pane: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl TeamManifest {
    pub fn new(
        team_name: impl Into<String>,
        task_description: impl Into<String>,
        leader: LeaderIdentity,
        transport_session: impl Into<String>,
        default_agent_type: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            team_name: team_name.into(),
            task_description: task_description.into(),
            leader,
            policy: TeamPolicy::default(),
            permissions: PermissionsSnapshot::default(),
            transport_session: transport_session.into(),
            default_agent_type: default_agent_type.into(),
            worker_count: 0,
            initial_worker_count: 0,
            active_worker_count: 0,
            workers: Vec::new(),
            draining_workers: Vec::new(),
            scaling: ScalingPolicy::default(),
            resource_limits: ResourceLimits::default(),
            next_task_id: 1,
            next_worker_index: 1,
            leader_pane: None,
            hud_pane: None,
            created_at: Utc::now(),
        }
    }

    /// Look up a worker identity by name.
    pub fn worker(&self, name: &str) -> Option<&WorkerIdentity> {
        self.workers.iter().find(|w| w.name == name)
    }

    /// Whether the named worker is currently draining.
    pub fn is_draining(&self, name: &str) -> bool {
        self.draining_workers.iter().any(|w| w == name)
    }

    /// Allocate the next task id, bumping the counter.
    pub fn allocate_task_id(&mut self) -> String {
        let id = self.next_task_id;
        self.next_task_id += 1;
        id.to_string()
    }

    /// Allocate the next worker index, bumping the counter.
    pub fn allocate_worker_index(&mut self) -> u64 {
        let index = self.next_worker_index;
        self.next_worker_index += 1;
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leader() -> LeaderIdentity {
        LeaderIdentity {
            session_id: "sess-1".into(),
            worker_id: "leader".into(),
            role: "lead".into(),
        }
    }

    #[test]
    fn test_counters_are_monotone() {
        let mut m = TeamManifest::new("t1", "do things", leader(), "foreman-t1", "executor");
        assert_eq!(m.allocate_task_id(), "1");
        assert_eq!(m.allocate_task_id(), "2");
        assert_eq!(m.next_task_id, 3);

        assert_eq!(m.allocate_worker_index(), 1);
        assert_eq!(m.allocate_worker_index(), 2);
        assert_eq!(m.next_worker_index, 3);
    }

    #[test]
    fn test_manifest_roundtrip() {
        let m = TeamManifest::new("t1", "do things", leader(), "foreman-t1", "executor");
        let json = serde_json::to_string(&m).unwrap();
        let back: TeamManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.schema_version, SCHEMA_VERSION);
        assert_eq!(back.team_name, "t1");
        assert_eq!(back.next_task_id, 1);
    }
}
