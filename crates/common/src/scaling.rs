//! Scaling policy, recommendations, and the scaling event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-team scaling policy, persisted on the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingPolicy {
    /// Whether high-confidence recommendations are applied automatically.
    #[serde(default)]
    pub auto_apply: bool,

    pub min_workers: usize,
    pub max_workers: usize,

    /// pending/active ratio above which scale-up is recommended.
    pub scale_up_threshold: f64,

    /// idle/active ratio above which scale-down is recommended.
    pub scale_down_threshold: f64,

    /// Minimum time between applied scaling actions.
    pub cooldown_ms: u64,

    /// How long a worker must be idle before it counts toward scale-down.
    pub idle_timeout_ms: u64,

    /// Estimated memory footprint of one worker, for the resource gate.
    pub per_worker_mem_mb: u64,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            auto_apply: false,
            min_workers: 1,
            max_workers: 8,
            scale_up_threshold: 3.0,
            scale_down_threshold: 0.5,
            cooldown_ms: 60_000,
            idle_timeout_ms: 120_000,
            per_worker_mem_mb: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingTrigger {
    Manual,
    Auto,
}

/// Point-in-time resource reading taken before a scaling decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_load_1m: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_mem_mb: Option<u64>,

    pub active_workers: usize,
    pub pending_tasks: usize,
    pub idle_workers: usize,
}

/// One entry of the scaling history log (FIFO-evicted at 100 entries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub timestamp: DateTime<Utc>,
    pub action: ScalingAction,
    pub trigger: ScalingTrigger,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers_added: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers_removed: Option<usize>,

    pub reason: String,
    pub resource_snapshot: ResourceSnapshot,
}

/// A structured scale suggestion computed by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ScalingRecommendation {
    ScaleUp { count: usize },
    ScaleDown { count: usize },
    None,
}

impl ScalingRecommendation {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults_match_contract() {
        let p = ScalingPolicy::default();
        assert_eq!(p.min_workers, 1);
        assert!((p.scale_up_threshold - 3.0).abs() < f64::EPSILON);
        assert!((p.scale_down_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(p.cooldown_ms, 60_000);
        assert_eq!(p.per_worker_mem_mb, 200);
    }

    #[test]
    fn test_recommendation_tagged_wire_form() {
        let r = ScalingRecommendation::ScaleUp { count: 2 };
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"action\":\"scale_up\""));
        assert!(json.contains("\"count\":2"));
    }
}
