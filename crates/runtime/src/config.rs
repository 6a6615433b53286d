//! Runtime configuration.
//!
//! Values come from (lowest to highest precedence) built-in defaults, an
//! optional TOML file, and environment variables.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use foreman_common::Result;

/// Hard ceiling on workers per team, independent of policy.
pub const ABSOLUTE_MAX_WORKERS: usize = 20;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// `FORCE_TRANSPORT`: `Some(true)` = multiplexer, `Some(false)` =
    /// process, `None` = probe.
    pub force_transport: Option<bool>,

    /// `READY_TIMEOUT_MS`: how long bootstrap waits for a CLI prompt.
    pub ready_timeout_ms: u64,

    /// Capture re-poll interval during the readiness wait.
    pub ready_poll_ms: u64,

    /// `LEADER_NUDGE_MS`: team-wide inactivity before a leader nudge.
    pub leader_nudge_ms: u64,

    /// `CLAIM_LEASE_MS`: task claim lease duration.
    pub claim_lease_ms: u64,

    /// `SHUTDOWN_GRACE_MS`: ack wait budget and kill grace.
    pub shutdown_grace_ms: u64,

    /// `DRAIN_TIMEOUT_MS`: drain duration that triggers a warning.
    pub drain_timeout_ms: u64,

    /// Heartbeat age beyond which a failed pid probe counts as dead.
    pub inactivity_ceiling_ms: u64,

    /// Minimum interval between monitor ticks.
    pub min_tick_interval_ms: u64,

    /// Soft tick runtime budget; slower ticks log a warning.
    pub tick_soft_budget_ms: u64,

    /// `AUTO_SCALE`: apply high-confidence recommendations automatically.
    pub auto_scale: bool,

    /// `SCALE_MAX_CPU_PERCENT` / `SCALE_MIN_FREE_MEM_MB`: resource gate.
    pub scale_max_cpu_percent: f64,
    pub scale_min_free_mem_mb: u64,

    /// `SCALE_COOLDOWN_MS`, `SCALE_UP_THRESHOLD`, `SCALE_DOWN_THRESHOLD`,
    /// `SCALE_IDLE_TIMEOUT_MS`, `SCALE_MIN_WORKERS`,
    /// `SCALE_PER_WORKER_MEM_MB`.
    pub scale_cooldown_ms: u64,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub scale_idle_timeout_ms: u64,
    pub scale_min_workers: usize,
    pub scale_per_worker_mem_mb: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            force_transport: None,
            ready_timeout_ms: 45_000,
            ready_poll_ms: 250,
            leader_nudge_ms: 120_000,
            claim_lease_ms: 900_000,
            shutdown_grace_ms: 15_000,
            drain_timeout_ms: 300_000,
            inactivity_ceiling_ms: 600_000,
            min_tick_interval_ms: 1_000,
            tick_soft_budget_ms: 5_000,
            auto_scale: false,
            scale_max_cpu_percent: 80.0,
            scale_min_free_mem_mb: 512,
            scale_cooldown_ms: 60_000,
            scale_up_threshold: 3.0,
            scale_down_threshold: 0.5,
            scale_idle_timeout_ms: 120_000,
            scale_min_workers: 1,
            scale_per_worker_mem_mb: 200,
        }
    }
}

impl RuntimeConfig {
    /// Load from a TOML file; missing keys fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| foreman_common::ForemanError::Config(format!("bad config file: {e}")))
    }

    /// Resolve the effective config: optional file, then env overrides.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let base = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(base.apply_env())
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    fn apply_env(mut self) -> Self {
        self.force_transport = env_flag("FORCE_TRANSPORT").or(self.force_transport);
        self.ready_timeout_ms = env_u64("READY_TIMEOUT_MS", self.ready_timeout_ms);
        self.leader_nudge_ms = env_u64("LEADER_NUDGE_MS", self.leader_nudge_ms);
        self.claim_lease_ms = env_u64("CLAIM_LEASE_MS", self.claim_lease_ms);
        self.shutdown_grace_ms = env_u64("SHUTDOWN_GRACE_MS", self.shutdown_grace_ms);
        self.drain_timeout_ms = env_u64("DRAIN_TIMEOUT_MS", self.drain_timeout_ms);
        if let Some(auto) = env_flag("AUTO_SCALE") {
            self.auto_scale = auto;
        }
        self.scale_max_cpu_percent =
            env_f64("SCALE_MAX_CPU_PERCENT", self.scale_max_cpu_percent);
        self.scale_min_free_mem_mb =
            env_u64("SCALE_MIN_FREE_MEM_MB", self.scale_min_free_mem_mb);
        self.scale_cooldown_ms = env_u64("SCALE_COOLDOWN_MS", self.scale_cooldown_ms);
        self.scale_up_threshold = env_f64("SCALE_UP_THRESHOLD", self.scale_up_threshold);
        self.scale_down_threshold = env_f64("SCALE_DOWN_THRESHOLD", self.scale_down_threshold);
        self.scale_idle_timeout_ms =
            env_u64("SCALE_IDLE_TIMEOUT_MS", self.scale_idle_timeout_ms);
        self.scale_min_workers =
            env_u64("SCALE_MIN_WORKERS", self.scale_min_workers as u64) as usize;
        self.scale_per_worker_mem_mb =
            env_u64("SCALE_PER_WORKER_MEM_MB", self.scale_per_worker_mem_mb);
        self
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// `1` → true, `0` → false, anything else → unset.
fn env_flag(name: &str) -> Option<bool> {
    match std::env::var(name).ok()?.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.ready_timeout_ms, 45_000);
        assert_eq!(cfg.leader_nudge_ms, 120_000);
        assert_eq!(cfg.claim_lease_ms, 900_000);
        assert_eq!(cfg.shutdown_grace_ms, 15_000);
        assert_eq!(cfg.drain_timeout_ms, 300_000);
        assert_eq!(cfg.scale_min_workers, 1);
        assert!(!cfg.auto_scale);
    }

    #[test]
    fn test_absolute_ceiling() {
        assert_eq!(ABSOLUTE_MAX_WORKERS, 20);
    }

    #[test]
    fn test_file_overrides_partial() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("foreman.toml");
        std::fs::write(
            &path,
            "claim_lease_ms = 1234\nscale_up_threshold = 4.5\nforce_transport = false\n",
        )
        .unwrap();

        let cfg = RuntimeConfig::from_file(&path).unwrap();
        assert_eq!(cfg.claim_lease_ms, 1234);
        assert!((cfg.scale_up_threshold - 4.5).abs() < f64::EPSILON);
        assert_eq!(cfg.force_transport, Some(false));
        // Untouched keys keep their defaults.
        assert_eq!(cfg.ready_timeout_ms, 45_000);
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("foreman.toml");
        std::fs::write(&path, "claim_lease_ms = \"not a number\"").unwrap();
        assert!(RuntimeConfig::from_file(&path).is_err());
    }
}
