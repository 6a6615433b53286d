//! On-demand resource sampling for the scale-up gate.
//!
//! Reads `/proc/loadavg` and `/proc/meminfo` directly; there is no sampling
//! daemon. On platforms without procfs both readings come back `None` and
//! the gate passes with a one-time warning; `resource_denied` is only ever
//! produced from an actual sample.

use std::sync::Once;

use foreman_common::ResourceSnapshot;
use tracing::warn;

static UNAVAILABLE_WARNED: Once = Once::new();

/// Sample the 1-minute load average (as a percentage of one core) and free
/// memory, folding in the provided team counts.
pub fn sample(active_workers: usize, pending_tasks: usize, idle_workers: usize) -> ResourceSnapshot {
    let cpu_load_1m = read_loadavg();
    let free_mem_mb = read_available_mem_mb();

    if cpu_load_1m.is_none() && free_mem_mb.is_none() {
        UNAVAILABLE_WARNED.call_once(|| {
            warn!("Resource sampling unavailable on this platform; scale-up gate passes open");
        });
    }

    ResourceSnapshot {
        cpu_load_1m,
        free_mem_mb,
        active_workers,
        pending_tasks,
        idle_workers,
    }
}

/// 1-minute load average as a percentage (1.0 load on one core = 100%).
fn read_loadavg() -> Option<f64> {
    let content = std::fs::read_to_string("/proc/loadavg").ok()?;
    let load: f64 = content.split_whitespace().next()?.parse().ok()?;
    Some(load * 100.0)
}

/// `MemAvailable` from /proc/meminfo, in megabytes.
fn read_available_mem_mb() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kb: u64 = rest
                .trim()
                .split_whitespace()
                .next()?
                .parse()
                .ok()?;
            return Some(kb / 1024);
        }
    }
    None
}

/// How many additional workers the sampled resources allow.
///
/// `None` readings do not constrain (the gate passes open); an actual
/// reading below the floor allows zero.
pub fn allowed_new_workers(
    snapshot: &ResourceSnapshot,
    min_free_mem_mb: u64,
    per_worker_mem_mb: u64,
    max_cpu_percent: f64,
) -> usize {
    if let Some(cpu) = snapshot.cpu_load_1m {
        if cpu > max_cpu_percent {
            return 0;
        }
    }
    match snapshot.free_mem_mb {
        Some(free) => {
            let headroom = free.saturating_sub(min_free_mem_mb);
            (headroom / per_worker_mem_mb.max(1)) as usize
        }
        None => usize::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu: Option<f64>, mem: Option<u64>) -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_load_1m: cpu,
            free_mem_mb: mem,
            active_workers: 2,
            pending_tasks: 0,
            idle_workers: 0,
        }
    }

    #[test]
    fn test_cpu_over_limit_allows_zero() {
        let snap = snapshot(Some(95.0), Some(4096));
        assert_eq!(allowed_new_workers(&snap, 512, 200, 80.0), 0);
    }

    #[test]
    fn test_memory_headroom_division() {
        // (2048 - 512) / 200 = 7
        let snap = snapshot(Some(10.0), Some(2048));
        assert_eq!(allowed_new_workers(&snap, 512, 200, 80.0), 7);
    }

    #[test]
    fn test_below_floor_allows_zero() {
        let snap = snapshot(Some(10.0), Some(400));
        assert_eq!(allowed_new_workers(&snap, 512, 200, 80.0), 0);
    }

    #[test]
    fn test_unavailable_readings_pass_open() {
        let snap = snapshot(None, None);
        assert_eq!(allowed_new_workers(&snap, 512, 200, 80.0), usize::MAX);
    }

    #[test]
    fn test_sample_carries_team_counts() {
        let snap = sample(3, 9, 1);
        assert_eq!(snap.active_workers, 3);
        assert_eq!(snap.pending_tasks, 9);
        assert_eq!(snap.idle_workers, 1);
    }
}
