//! CLI spawners: build the command that starts a worker's AI CLI and
//! recognize when that CLI has reached an interactive prompt.
//!
//! Argument resolution is contract-sensitive: exactly one canonical
//! `--model` flag is emitted, with precedence explicit override > inherited
//! leader flags > per-agent-type fallback. Orphan `--model` tokens and empty
//! `--model=` forms are dropped before resolution, and a reasoning-effort
//! overlay is injected only when not already present.

pub mod claude;
pub mod codex;

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use foreman_common::{ForemanError, Result};

pub use claude::ClaudeSpawner;
pub use codex::CodexSpawner;

/// Words whose presence near the end of a capture mean the CLI is still
/// coming up.
static BUSY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(loading|starting|initializing|connecting)\b").unwrap());

/// How many trailing lines the readiness scan inspects.
const READY_SCAN_LINES: usize = 10;

/// Inputs to command construction for one worker.
#[derive(Debug, Clone)]
pub struct SpawnerConfig {
    pub team: String,
    pub worker: String,
    pub agent_type: String,

    /// Optional shell rc file sourced before exec.
    pub shell_rc: Option<PathBuf>,

    /// Flags inherited from the leader's own invocation.
    pub leader_args: Vec<String>,

    /// Explicit model override (from the environment); beats everything.
    pub model_override: Option<String>,
}

/// A CLI-specific spawner.
pub trait Spawner: Send + Sync {
    /// Spawner name ("codex", "claude").
    fn name(&self) -> &str;

    /// A shell-quoted command string: sources the rc file, exports
    /// `TEAM_WORKER=<team>/<worker>`, and execs the CLI.
    fn build_command(&self, cfg: &SpawnerConfig) -> String;

    /// Environment overlay for the worker's slot.
    fn build_env(&self, cfg: &SpawnerConfig) -> Vec<(String, String)> {
        vec![(
            "TEAM_WORKER".to_string(),
            format!("{}/{}", cfg.team, cfg.worker),
        )]
    }

    /// Whether a capture tail shows the CLI at an interactive prompt.
    fn is_ready(&self, capture: &str) -> bool;
}

/// Resolve a spawner by CLI name.
pub fn spawner_for(cli: &str) -> Result<Arc<dyn Spawner>> {
    match cli {
        "codex" => Ok(Arc::new(CodexSpawner::new())),
        "claude" => Ok(Arc::new(ClaudeSpawner::new())),
        other => Err(ForemanError::Config(format!("unknown worker CLI '{other}'"))),
    }
}

/// Reasoning-effort level inferred from a model name token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Infer effort from the model name: small/fast names run low, deep-thinking
/// names run high, everything else medium.
pub fn infer_effort(model: &str) -> Effort {
    let lower = model.to_lowercase();
    if ["mini", "nano", "haiku", "flash", "fast"]
        .iter()
        .any(|tok| lower.contains(tok))
    {
        Effort::Low
    } else if ["opus", "pro", "max", "think"]
        .iter()
        .any(|tok| lower.contains(tok))
    {
        Effort::High
    } else {
        Effort::Medium
    }
}

/// Extract the model value from inherited flags, if one is present.
fn inherited_model(args: &[String]) -> Option<String> {
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if arg == "--model" || arg == "-m" {
            if let Some(value) = iter.peek() {
                if !value.starts_with('-') {
                    return Some((*value).clone());
                }
            }
        } else if let Some(value) = arg.strip_prefix("--model=") {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Drop every model-flag form (valued, orphan, or empty `--model=`) from the
/// inherited flags; the canonical flag is re-emitted by [`resolve_args`].
fn strip_model_flags(args: &[String]) -> Vec<String> {
    let mut kept = Vec::with_capacity(args.len());
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if arg == "--model" || arg == "-m" {
            // Consume the value too, when one follows.
            if let Some(value) = iter.peek() {
                if !value.starts_with('-') {
                    iter.next();
                }
            }
            continue;
        }
        if arg.starts_with("--model=") {
            continue;
        }
        kept.push(arg.clone());
    }
    kept
}

fn has_flag(args: &[String], flag: &str) -> bool {
    let prefix = format!("{flag}=");
    args.iter().any(|a| a == flag || a.starts_with(&prefix))
}

/// Resolve the worker argument list: inherited flags (minus model forms),
/// exactly one `--model`, and an effort overlay when the CLI supports one.
pub fn resolve_args(cfg: &SpawnerConfig, fallback_model: &str, with_effort: bool) -> Vec<String> {
    let model = cfg
        .model_override
        .clone()
        .or_else(|| inherited_model(&cfg.leader_args))
        .unwrap_or_else(|| fallback_model.to_string());

    let mut args = strip_model_flags(&cfg.leader_args);
    args.push("--model".to_string());
    args.push(model.clone());

    if with_effort && !has_flag(&args, "--reasoning-effort") {
        args.push("--reasoning-effort".to_string());
        args.push(infer_effort(&model).as_str().to_string());
    }
    args
}

/// POSIX single-quote shell quoting.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:%@".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Compose the full slot command: rc sourcing, identity export, exec.
pub(crate) fn compose_command(cfg: &SpawnerConfig, cli: &str, args: &[String]) -> String {
    let mut parts = Vec::new();
    if let Some(rc) = &cfg.shell_rc {
        let rc = shell_quote(&rc.to_string_lossy());
        parts.push(format!("[ -f {rc} ] && . {rc}"));
    }
    parts.push(format!(
        "export TEAM_WORKER={}",
        shell_quote(&format!("{}/{}", cfg.team, cfg.worker))
    ));

    let mut exec = format!("exec {cli}");
    for arg in args {
        exec.push(' ');
        exec.push_str(&shell_quote(arg));
    }
    parts.push(exec);
    parts.join("; ")
}

/// Shared readiness scan over a stripped capture tail.
///
/// Ready iff the last non-empty line ends with a prompt glyph or any line in
/// the scanned tail carries a status-bar signature, and none of the busy
/// words appear in the scanned tail.
pub(crate) fn prompt_ready(capture: &str, glyphs: &[char], signatures: &[&str]) -> bool {
    let stripped = strip_ansi_escapes::strip(capture.as_bytes());
    let text = String::from_utf8_lossy(&stripped);

    let lines: Vec<&str> = text.lines().collect();
    let tail_start = lines.len().saturating_sub(READY_SCAN_LINES);
    let tail = &lines[tail_start..];

    if tail.iter().any(|line| BUSY_PATTERN.is_match(line)) {
        return false;
    }

    let last_nonempty = tail.iter().rev().find(|l| !l.trim().is_empty());
    let glyph_ready = last_nonempty
        .map(|line| {
            let trimmed = line.trim_end();
            glyphs.iter().any(|g| trimmed.ends_with(*g))
        })
        .unwrap_or(false);

    let signature_ready = tail
        .iter()
        .any(|line| signatures.iter().any(|sig| line.contains(sig)));

    glyph_ready || signature_ready
}
