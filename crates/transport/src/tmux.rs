//! Multiplexed transport: one tmux pane per worker.
//!
//! All interaction goes through the `tmux` binary via a [`CommandRunner`],
//! so the transport is testable with a scripted mock. Pane addresses are
//! tmux pane ids (`%<n>`) and are validated on every entry point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use foreman_common::{ForemanError, Result};

use crate::command::{CommandOutput, CommandRunner};
use crate::{validate_pane_address, SlotSpec, Transport, TransportKind};

/// How many lines of history a capture returns.
const CAPTURE_LINES: u32 = 120;

pub struct TmuxTransport {
    runner: Arc<dyn CommandRunner>,
}

impl TmuxTransport {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn tmux(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.runner.run("tmux", args, ".").await;
        if output.success {
            Ok(output)
        } else {
            Err(ForemanError::Transport(format!(
                "tmux {} failed: {}",
                args.first().copied().unwrap_or(""),
                output.stderr.trim()
            )))
        }
    }

    /// Does the pane still exist?
    async fn pane_exists(&self, address: &str) -> bool {
        self.runner
            .run("tmux", &["display", "-p", "-t", address, "#{pane_id}"], ".")
            .await
            .success
    }
}

#[async_trait]
impl Transport for TmuxTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Multiplexed
    }

    async fn create_session(&self, name: &str) -> Result<String> {
        let output = self
            .tmux(&[
                "new-session",
                "-d",
                "-s",
                name,
                "-P",
                "-F",
                "#{session_name}",
            ])
            .await?;
        let handle = output.stdout.trim().to_string();
        debug!(session = %handle, "Created tmux session");
        Ok(if handle.is_empty() { name.to_string() } else { handle })
    }

    async fn add_slot(&self, session: &str, spec: &SlotSpec) -> Result<String> {
        let cwd = spec.cwd.to_string_lossy().into_owned();
        let mut args: Vec<String> = vec![
            "split-window".into(),
            "-d".into(),
            "-t".into(),
            session.into(),
            "-c".into(),
            cwd,
        ];
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.extend(["-P".into(), "-F".into(), "#{pane_id}".into()]);

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.tmux(&arg_refs).await?;
        let address = output.stdout.trim().to_string();
        validate_pane_address(&address)?;

        let _ = self
            .tmux(&["select-pane", "-t", &address, "-T", &spec.title])
            .await;
        // Re-tile so a team of N panes stays usable.
        let _ = self.tmux(&["select-layout", "-t", session, "tiled"]).await;

        debug!(session = %session, pane = %address, title = %spec.title, "Added pane");
        Ok(address)
    }

    async fn slot_pid(&self, address: &str) -> Result<Option<u32>> {
        validate_pane_address(address)?;
        let output = self
            .tmux(&["display", "-p", "-t", address, "#{pane_pid}"])
            .await?;
        Ok(output.stdout.trim().parse().ok())
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<()> {
        validate_pane_address(address)?;
        self.tmux(&["send-keys", "-t", address, "-l", text]).await?;
        Ok(())
    }

    async fn send_submit(&self, address: &str) -> Result<()> {
        validate_pane_address(address)?;
        // Both bindings: C-m for carriage return, Enter for the key event.
        self.tmux(&["send-keys", "-t", address, "C-m"]).await?;
        self.tmux(&["send-keys", "-t", address, "Enter"]).await?;
        Ok(())
    }

    async fn capture(&self, address: &str) -> Result<String> {
        validate_pane_address(address)?;
        let lines = format!("-{CAPTURE_LINES}");
        let output = self
            .tmux(&["capture-pane", "-p", "-t", address, "-S", &lines])
            .await?;
        Ok(output.stdout)
    }

    async fn kill_slot(&self, address: &str, grace: Duration) -> Result<()> {
        validate_pane_address(address)?;

        // Graceful first: SIGTERM the pane's process group leader.
        if let Ok(Some(pid)) = self.slot_pid(address).await {
            #[cfg(unix)]
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            #[cfg(not(unix))]
            let _ = pid;
        }

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if !self.pane_exists(address).await {
                debug!(pane = %address, "Pane exited within grace");
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if self.pane_exists(address).await {
            warn!(pane = %address, "Pane survived grace period, killing");
            let _ = self.tmux(&["kill-pane", "-t", address]).await;
        }
        Ok(())
    }

    async fn list_slots(&self, session: &str) -> Result<Vec<String>> {
        let output = self
            .tmux(&["list-panes", "-s", "-t", session, "-F", "#{pane_id}"])
            .await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    async fn destroy_session(&self, session: &str) -> Result<()> {
        self.tmux(&["kill-session", "-t", session]).await?;
        debug!(session = %session, "Destroyed tmux session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MockCommandRunner;

    fn transport_with(responses: Vec<CommandOutput>) -> (TmuxTransport, Arc<MockCommandRunner>) {
        let runner = Arc::new(MockCommandRunner::new(responses));
        (TmuxTransport::new(runner.clone()), runner)
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    #[tokio::test]
    async fn test_add_slot_returns_pane_id() {
        let (transport, runner) = transport_with(vec![ok("%7\n")]);
        let spec = SlotSpec {
            title: "worker-1".into(),
            cwd: "/work".into(),
            env: vec![("TEAM_WORKER".into(), "t1/worker-1".into())],
        };
        let address = transport.add_slot("foreman-t1", &spec).await.unwrap();
        assert_eq!(address, "%7");

        let calls = runner.calls();
        assert_eq!(calls[0][1], "split-window");
        assert!(calls[0].contains(&"-e".to_string()));
        assert!(calls[0].contains(&"TEAM_WORKER=t1/worker-1".to_string()));
    }

    #[tokio::test]
    async fn test_add_slot_rejects_bad_address() {
        let (transport, _) = transport_with(vec![ok("not-a-pane\n")]);
        let spec = SlotSpec {
            title: "worker-1".into(),
            cwd: "/work".into(),
            env: vec![],
        };
        assert!(transport.add_slot("foreman-t1", &spec).await.is_err());
    }

    #[tokio::test]
    async fn test_send_submit_sends_both_bindings() {
        let (transport, runner) = transport_with(vec![]);
        transport.send_submit("%3").await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains(&"C-m".to_string()));
        assert!(calls[1].contains(&"Enter".to_string()));
    }

    #[tokio::test]
    async fn test_operations_validate_addresses() {
        let (transport, _) = transport_with(vec![]);
        assert!(transport.send_text("pane-3", "hi").await.is_err());
        assert!(transport.capture("3").await.is_err());
        assert!(transport
            .kill_slot("%x", Duration::from_millis(10))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_list_slots_parses_lines() {
        let (transport, _) = transport_with(vec![ok("%1\n%2\n%3\n")]);
        let slots = transport.list_slots("foreman-t1").await.unwrap();
        assert_eq!(slots, vec!["%1", "%2", "%3"]);
    }
}
