//! Spawner for the `codex` CLI.

use super::{compose_command, prompt_ready, resolve_args, Spawner, SpawnerConfig};

/// Prompt glyphs the codex composer renders at an idle input line.
const PROMPT_GLYPHS: &[char] = &['›', '❯', '>'];

/// Status-bar fragments only visible once the TUI is fully up.
const STATUS_SIGNATURES: &[&str] = &["context left", "Ctrl+C to quit"];

pub struct CodexSpawner;

impl CodexSpawner {
    pub fn new() -> Self {
        Self
    }

    fn fallback_model(agent_type: &str) -> &'static str {
        match agent_type {
            "planner" => "gpt-5",
            _ => "gpt-5-codex",
        }
    }
}

impl Default for CodexSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl Spawner for CodexSpawner {
    fn name(&self) -> &str {
        "codex"
    }

    fn build_command(&self, cfg: &SpawnerConfig) -> String {
        let args = resolve_args(cfg, Self::fallback_model(&cfg.agent_type), true);
        compose_command(cfg, "codex", &args)
    }

    fn is_ready(&self, capture: &str) -> bool {
        prompt_ready(capture, PROMPT_GLYPHS, STATUS_SIGNATURES)
    }
}
