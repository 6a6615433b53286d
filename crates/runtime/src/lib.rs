//! The foreman team runtime.
//!
//! Composes a transport (tmux panes or PTY children) and a spawner (codex or
//! claude) with the filesystem stores to start a team, reconcile it with a
//! monitor loop, scale it, and tear it down without leaking slots.

pub mod bootstrap;
pub mod config;
pub mod monitor;
pub mod resources;
pub mod runtime;
pub mod scaling;
pub mod shutdown;

pub use bootstrap::bootstrap_worker;
pub use config::{RuntimeConfig, ABSOLUTE_MAX_WORKERS};
pub use monitor::{monitor_loop, monitor_tick, spawn_output_watcher, TickReport};
pub use runtime::{StartOptions, StartReport, TaskSeed, TeamRuntime};
pub use scaling::{
    compute_recommendation, maybe_auto_apply, scale_down, scale_up, ScaleDownOutcome,
    ScaleDownRequest, ScaleUpOutcome,
};
pub use shutdown::{
    cleanup_team, compute_kill_targets, shutdown_team, CleanupSummary, KillPlan, ShutdownOutcome,
};
