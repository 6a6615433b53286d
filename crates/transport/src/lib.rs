//! Worker slot transports and CLI spawners.
//!
//! A [`Transport`] hosts worker processes in addressable slots (either
//! panes of a shared tmux session or PTY child processes), and a
//! [`Spawner`] knows how to start and recognize one specific AI CLI inside
//! a slot. Both are picked by configuration at startup and used as trait
//! objects everywhere else.

pub mod buffer;
pub mod command;
pub mod process;
pub mod spawner;
pub mod tmux;

use std::time::Duration;

use async_trait::async_trait;

use foreman_common::{ForemanError, Result};

pub use buffer::TailBuffer;
pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use process::ProcessTransport;
pub use spawner::{spawner_for, ClaudeSpawner, CodexSpawner, Spawner, SpawnerConfig};
pub use tmux::TmuxTransport;

/// Which transport variant is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Each worker is a pane in a shared terminal-multiplexer session.
    Multiplexed,
    /// Each worker is a PTY child process of the leader.
    Process,
}

/// What to put in a freshly created slot.
#[derive(Debug, Clone)]
pub struct SlotSpec {
    /// Human-facing slot title (shown as the pane title).
    pub title: String,
    /// Working directory for the slot's shell.
    pub cwd: std::path::PathBuf,
    /// Extra environment for the slot.
    pub env: Vec<(String, String)>,
}

/// Host for worker slots.
///
/// Addresses are opaque strings; the multiplexed variant normalizes them to
/// leading-`%` tmux pane ids and validates that prefix on every entry point.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Create (or register) a session and return its handle.
    async fn create_session(&self, name: &str) -> Result<String>;

    /// Add a slot running a login shell; returns the slot address.
    async fn add_slot(&self, session: &str, spec: &SlotSpec) -> Result<String>;

    /// Pid of the process hosted by the slot, if known.
    async fn slot_pid(&self, address: &str) -> Result<Option<u32>>;

    /// Type literal text into the slot (no submission).
    async fn send_text(&self, address: &str, text: &str) -> Result<()>;

    /// Send both a carriage return and an Enter keypress, covering dual
    /// submit bindings.
    async fn send_submit(&self, address: &str) -> Result<()>;

    /// A bounded tail of the slot's visible output.
    async fn capture(&self, address: &str) -> Result<String>;

    /// Terminate the slot: SIGTERM-equivalent, wait up to `grace`, then
    /// force.
    async fn kill_slot(&self, address: &str, grace: Duration) -> Result<()>;

    /// Addresses of all live slots in the session.
    async fn list_slots(&self, session: &str) -> Result<Vec<String>>;

    async fn destroy_session(&self, session: &str) -> Result<()>;
}

/// Validate the multiplexed-transport address normal form.
pub fn validate_pane_address(address: &str) -> Result<()> {
    if address.starts_with('%') && address.len() > 1 && address[1..].chars().all(|c| c.is_ascii_digit())
    {
        Ok(())
    } else {
        Err(ForemanError::Transport(format!(
            "invalid pane address '{address}' (expected %<n>)"
        )))
    }
}

/// Decide which transport to use.
///
/// `force` mirrors `FORCE_TRANSPORT`: `Some(true)` demands the multiplexer
/// (an error if the probe fails), `Some(false)` demands the process
/// variant, `None` lets the capability probe decide.
pub async fn detect_transport(
    runner: &dyn CommandRunner,
    force: Option<bool>,
) -> Result<TransportKind> {
    match force {
        Some(false) => return Ok(TransportKind::Process),
        Some(true) => {
            return if probe_multiplexer(runner).await {
                Ok(TransportKind::Multiplexed)
            } else {
                Err(ForemanError::TransportUnavailable(
                    "tmux forced but `tmux -V` failed".into(),
                ))
            };
        }
        None => {}
    }

    if probe_multiplexer(runner).await {
        Ok(TransportKind::Multiplexed)
    } else {
        tracing::info!("Terminal multiplexer unavailable, using process transport");
        Ok(TransportKind::Process)
    }
}

/// Capability probe: does `tmux -V` run successfully?
pub async fn probe_multiplexer(runner: &dyn CommandRunner) -> bool {
    runner.run("tmux", &["-V"], ".").await.success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MockCommandRunner;

    #[test]
    fn test_pane_address_validation() {
        assert!(validate_pane_address("%0").is_ok());
        assert!(validate_pane_address("%23").is_ok());
        assert!(validate_pane_address("23").is_err());
        assert!(validate_pane_address("%").is_err());
        assert!(validate_pane_address("%2x").is_err());
        assert!(validate_pane_address("pane-2").is_err());
    }

    #[tokio::test]
    async fn test_detect_force_process() {
        let runner = MockCommandRunner::success("tmux 3.4");
        let kind = detect_transport(&runner, Some(false)).await.unwrap();
        assert_eq!(kind, TransportKind::Process);
    }

    #[tokio::test]
    async fn test_detect_probe_failure_downgrades() {
        let runner = MockCommandRunner::failure("tmux: command not found");
        let kind = detect_transport(&runner, None).await.unwrap();
        assert_eq!(kind, TransportKind::Process);
    }

    #[tokio::test]
    async fn test_detect_forced_multiplexer_without_tmux_errors() {
        let runner = MockCommandRunner::failure("tmux: command not found");
        let err = detect_transport(&runner, Some(true)).await.unwrap_err();
        assert!(matches!(err, ForemanError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn test_detect_probe_success_uses_multiplexer() {
        let runner = MockCommandRunner::success("tmux 3.4");
        let kind = detect_transport(&runner, None).await.unwrap();
        assert_eq!(kind, TransportKind::Multiplexed);
    }
}
