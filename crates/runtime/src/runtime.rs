//! The team runtime: composes a transport and a spawner with the stores to
//! start, observe, and tear down a team.

use std::path::PathBuf;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use foreman_common::{
    ForemanError, LeaderIdentity, MonitorSnapshot, ResourceLimits, Result, ScalingPolicy,
    TeamManifest,
};
use foreman_store::{
    ApprovalStore, EventLog, MailboxStore, ManifestStore, PanesStore, ScalingHistory, SignalStore,
    TaskStore, TeamIndex, TeamPaths, WorkerStore,
};
use foreman_transport::{Spawner, Transport};

use crate::bootstrap;
use crate::config::{RuntimeConfig, ABSOLUTE_MAX_WORKERS};

/// One task to create at team start.
#[derive(Debug, Clone)]
pub struct TaskSeed {
    pub subject: String,
    pub description: String,
    /// Ids are allocated monotonically from 1, so seeds may reference
    /// earlier siblings by their predictable ids.
    pub depends_on: Vec<String>,
    pub requires_code_change: bool,
}

impl TaskSeed {
    pub fn new(subject: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            description: description.into(),
            depends_on: Vec::new(),
            requires_code_change: false,
        }
    }
}

/// Options for [`TeamRuntime::start_team`].
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub task_description: String,
    pub worker_count: usize,
    /// Agent types cycled across workers; the first is the team default.
    pub agent_types: Vec<String>,
    pub tasks: Vec<TaskSeed>,
    /// Leader flags workers inherit (model resolution applies).
    pub leader_args: Vec<String>,
}

/// What start produced, per worker.
#[derive(Debug, Clone)]
pub struct StartReport {
    pub team: String,
    pub session: String,
    pub workers: Vec<String>,
    pub task_ids: Vec<String>,
}

pub struct TeamRuntime {
    pub team: String,
    pub project_root: PathBuf,
    pub config: RuntimeConfig,
    pub transport: std::sync::Arc<dyn Transport>,
    pub spawner: std::sync::Arc<dyn Spawner>,

    pub paths: TeamPaths,
    pub manifest: ManifestStore,
    pub tasks: TaskStore,
    pub mailbox: MailboxStore,
    pub workers: WorkerStore,
    pub signals: SignalStore,
    pub events: EventLog,
    pub panes: PanesStore,
    pub approvals: ApprovalStore,
    pub history: ScalingHistory,

    /// Last seen capture hash per worker, for the output watchers.
    pub(crate) capture_seen: Mutex<std::collections::HashMap<String, u64>>,
}

impl TeamRuntime {
    pub fn new(
        project_root: impl Into<PathBuf>,
        team: impl Into<String>,
        transport: std::sync::Arc<dyn Transport>,
        spawner: std::sync::Arc<dyn Spawner>,
        config: RuntimeConfig,
    ) -> Self {
        let team = team.into();
        let project_root = project_root.into();
        let paths = TeamPaths::new(&project_root, &team);
        Self {
            manifest: ManifestStore::new(paths.clone()),
            tasks: TaskStore::new(paths.clone(), config.claim_lease_ms as i64),
            mailbox: MailboxStore::new(paths.clone(), &team),
            workers: WorkerStore::new(paths.clone()),
            signals: SignalStore::new(paths.clone()),
            events: EventLog::new(paths.clone()),
            panes: PanesStore::new(paths.clone()),
            approvals: ApprovalStore::new(paths.clone(), &team),
            history: ScalingHistory::new(paths.clone()),
            paths,
            team,
            project_root,
            config,
            transport,
            spawner,
            capture_seen: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Load the manifest or fail with `TeamNotFound`.
    pub fn load_manifest(&self) -> Result<TeamManifest> {
        self.manifest
            .load()
            .ok_or_else(|| ForemanError::TeamNotFound(self.team.clone()))
    }

    pub fn load_snapshot(&self) -> MonitorSnapshot {
        foreman_store::atomic::read_json(&self.paths.snapshot_file())
            .unwrap_or_else(|| MonitorSnapshot::initial(&self.team))
    }

    pub fn save_snapshot(&self, snapshot: &MonitorSnapshot) -> Result<()> {
        foreman_store::atomic::write_json(&self.paths.snapshot_file(), snapshot)
    }

    fn scaling_policy(&self) -> ScalingPolicy {
        let defaults = ScalingPolicy::default();
        ScalingPolicy {
            auto_apply: self.config.auto_scale,
            min_workers: self.config.scale_min_workers,
            max_workers: defaults.max_workers.min(ABSOLUTE_MAX_WORKERS),
            scale_up_threshold: self.config.scale_up_threshold,
            scale_down_threshold: self.config.scale_down_threshold,
            cooldown_ms: self.config.scale_cooldown_ms,
            idle_timeout_ms: self.config.scale_idle_timeout_ms,
            per_worker_mem_mb: self.config.scale_per_worker_mem_mb,
        }
    }

    /// Initialize a new team: manifest, session, tasks, then workers.
    ///
    /// Bootstraps run sequentially for cheaper failure diagnosis. Any hard
    /// failure after the session exists tears the session and state subtree
    /// back down.
    pub async fn start_team(
        &self,
        opts: StartOptions,
        cancel: &CancellationToken,
    ) -> Result<StartReport> {
        if self.manifest.exists() {
            return Err(ForemanError::State(format!(
                "team '{}' already exists",
                self.team
            )));
        }
        if opts.worker_count == 0 || opts.worker_count > ABSOLUTE_MAX_WORKERS {
            return Err(ForemanError::Config(format!(
                "worker count must be 1..={ABSOLUTE_MAX_WORKERS}"
            )));
        }

        // Fatal if this fails: without a session there is no team.
        let session = self
            .transport
            .create_session(&format!("foreman-{}", self.team))
            .await?;

        let default_agent_type = opts
            .agent_types
            .first()
            .cloned()
            .unwrap_or_else(|| "executor".to_string());
        let leader = LeaderIdentity {
            session_id: format!("{}-{}", self.team, std::process::id()),
            worker_id: "leader".to_string(),
            role: "lead".to_string(),
        };

        let mut manifest = TeamManifest::new(
            &self.team,
            &opts.task_description,
            leader,
            &session,
            &default_agent_type,
        );
        manifest.initial_worker_count = opts.worker_count;
        manifest.scaling = self.scaling_policy();
        manifest.resource_limits = ResourceLimits {
            max_cpu_percent: self.config.scale_max_cpu_percent,
            min_free_mem_mb: self.config.scale_min_free_mem_mb,
        };

        // Fatal if the manifest cannot be written at start time.
        if let Err(e) = self.manifest.save(&manifest) {
            let _ = self.transport.destroy_session(&session).await;
            return Err(e);
        }
        let _ = TeamIndex::new(&self.project_root).add(&self.team);

        let mut report = StartReport {
            team: self.team.clone(),
            session: session.clone(),
            workers: Vec::new(),
            task_ids: Vec::new(),
        };

        for seed in &opts.tasks {
            match self.tasks.create(
                &self.manifest,
                &seed.subject,
                &seed.description,
                seed.depends_on.clone(),
                seed.requires_code_change,
            ) {
                Ok(task) => report.task_ids.push(task.id),
                Err(e) => {
                    self.teardown_failed_start(&session).await;
                    return Err(e);
                }
            }
        }

        for i in 0..opts.worker_count {
            let agent_type = opts
                .agent_types
                .get(i % opts.agent_types.len().max(1))
                .cloned()
                .unwrap_or_else(|| default_agent_type.clone());

            match bootstrap::bootstrap_worker(self, &agent_type, &opts.leader_args, cancel).await {
                Ok(identity) => report.workers.push(identity.name),
                Err(e) => {
                    error!(team = %self.team, error = %e, "Bootstrap failed, tearing team down");
                    self.teardown_failed_start(&session).await;
                    return Err(e);
                }
            }
        }

        self.save_snapshot(&MonitorSnapshot::initial(&self.team))?;
        info!(
            team = %self.team,
            workers = report.workers.len(),
            tasks = report.task_ids.len(),
            "Team started"
        );
        Ok(report)
    }

    async fn teardown_failed_start(&self, session: &str) {
        let _ = self.transport.destroy_session(session).await;
        let _ = std::fs::remove_dir_all(self.paths.team_root());
        let _ = TeamIndex::new(&self.project_root).remove(&self.team);
    }
}
