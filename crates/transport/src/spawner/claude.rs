//! Spawner for the `claude` CLI.

use super::{compose_command, prompt_ready, resolve_args, Spawner, SpawnerConfig};

const PROMPT_GLYPHS: &[char] = &['›', '❯', '>'];

/// The claude TUI footer, only drawn once the prompt is interactive.
const STATUS_SIGNATURES: &[&str] = &["? for shortcuts", "bypass permissions"];

pub struct ClaudeSpawner;

impl ClaudeSpawner {
    pub fn new() -> Self {
        Self
    }

    fn fallback_model(agent_type: &str) -> &'static str {
        match agent_type {
            "planner" => "opus",
            _ => "sonnet",
        }
    }
}

impl Default for ClaudeSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl Spawner for ClaudeSpawner {
    fn name(&self) -> &str {
        "claude"
    }

    fn build_command(&self, cfg: &SpawnerConfig) -> String {
        // claude has no reasoning-effort flag; model only.
        let args = resolve_args(cfg, Self::fallback_model(&cfg.agent_type), false);
        compose_command(cfg, "claude", &args)
    }

    fn is_ready(&self, capture: &str) -> bool {
        prompt_ready(capture, PROMPT_GLYPHS, STATUS_SIGNATURES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SpawnerConfig {
        SpawnerConfig {
            team: "t1".into(),
            worker: "worker-1".into(),
            agent_type: "executor".into(),
            shell_rc: None,
            leader_args: vec![],
            model_override: None,
        }
    }

    #[test]
    fn test_command_has_no_effort_flag() {
        let command = ClaudeSpawner::new().build_command(&cfg());
        assert!(command.contains("exec claude"));
        assert!(command.contains("--model sonnet"));
        assert!(!command.contains("--reasoning-effort"));
    }

    #[test]
    fn test_readiness_via_footer() {
        let spawner = ClaudeSpawner::new();
        assert!(spawner.is_ready("╭───╮\n│ > │\n╰───╯\n  ? for shortcuts"));
        assert!(!spawner.is_ready("Loading conversation history\n> "));
    }

    #[test]
    fn test_inherited_model_kept() {
        let mut config = cfg();
        config.leader_args = vec!["--model".into(), "opus".into()];
        let command = ClaudeSpawner::new().build_command(&config);
        assert!(command.contains("--model opus"));
    }
}
