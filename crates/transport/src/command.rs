//! Command runner abstraction for shelling out to the multiplexer binary.
//!
//! The tmux transport issues many small `tmux ...` invocations; routing them
//! through a trait keeps that transport fully testable without a terminal.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

/// Output from one command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
}

/// Trait for running external commands. Mockable for testing.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str], working_dir: &str) -> CommandOutput;
}

/// Real command runner that spawns system processes.
pub struct SystemCommandRunner;

#[async_trait::async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str], working_dir: &str) -> CommandOutput {
        debug!(program = %program, args = ?args, "Running command");

        let result = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match result {
            Ok(output) => CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code(),
                success: output.status.success(),
            },
            Err(e) => {
                warn!(program = %program, error = %e, "Command failed to execute");
                CommandOutput {
                    stdout: String::new(),
                    stderr: format!("Failed to execute {}: {}", program, e),
                    exit_code: None,
                    success: false,
                }
            }
        }
    }
}

/// Mock command runner that scripts responses, recording every invocation.
pub struct MockCommandRunner {
    responses: std::sync::Mutex<Vec<CommandOutput>>,
    calls: std::sync::Mutex<Vec<Vec<String>>>,
    default: CommandOutput,
}

impl MockCommandRunner {
    pub fn new(responses: Vec<CommandOutput>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            calls: std::sync::Mutex::new(Vec::new()),
            default: CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
                success: true,
            },
        }
    }

    /// A mock whose every invocation succeeds with the given stdout.
    pub fn success(stdout: &str) -> Self {
        let mut mock = Self::new(Vec::new());
        mock.default = CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        };
        mock
    }

    /// A mock whose every invocation fails with the given stderr.
    pub fn failure(stderr: &str) -> Self {
        let mut mock = Self::new(Vec::new());
        mock.default = CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: Some(1),
            success: false,
        };
        mock
    }

    /// Every `program + args` combination seen so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, program: &str, args: &[&str], _working_dir: &str) -> CommandOutput {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().map(|a| a.to_string()));
        self.calls.lock().unwrap().push(call);

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            self.default.clone()
        } else {
            responses.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_scripted_then_default() {
        let runner = MockCommandRunner::new(vec![CommandOutput {
            stdout: "%5".into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }]);

        let first = runner.run("tmux", &["split-window"], ".").await;
        assert_eq!(first.stdout, "%5");

        let second = runner.run("tmux", &["list-panes"], ".").await;
        assert!(second.success);
        assert!(second.stdout.is_empty());

        assert_eq!(runner.calls().len(), 2);
        assert_eq!(runner.calls()[0], vec!["tmux", "split-window"]);
    }

    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let runner = SystemCommandRunner;
        let output = runner.run("echo", &["hello"], ".").await;
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_system_runner_missing_binary() {
        let runner = SystemCommandRunner;
        let output = runner.run("definitely-not-a-binary-xyz", &[], ".").await;
        assert!(!output.success);
        assert!(output.exit_code.is_none());
    }
}
