//! File-based advisory lock for scaling operations.
//!
//! The lock file carries `{pid, token, acquired_at}`. A lock older than the
//! stale TTL (5 minutes) may be stolen with a warning; release only removes
//! the file when the token still matches, so a stolen lock is never
//! clobbered by its previous owner.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use foreman_common::Result;

use crate::atomic;
use crate::paths::TeamPaths;

const STALE_AFTER: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    token: String,
    acquired_at: DateTime<Utc>,
}

/// Outcome of an acquire attempt.
#[derive(Debug)]
pub enum LockOutcome {
    Acquired(ScalingLockGuard),
    /// Someone else holds a non-stale lock.
    Held { pid: u32, acquired_at: DateTime<Utc> },
}

/// Proof of lock ownership; pass back to [`ScalingLock::release`].
#[derive(Debug)]
pub struct ScalingLockGuard {
    token: String,
    /// Whether a stale lock was stolen during acquisition.
    pub recovered_stale: bool,
}

#[derive(Debug, Clone)]
pub struct ScalingLock {
    paths: TeamPaths,
}

impl ScalingLock {
    pub fn new(paths: TeamPaths) -> Self {
        Self { paths }
    }

    pub fn acquire(&self) -> Result<LockOutcome> {
        let path = self.paths.scaling_lock_file();
        let mut recovered_stale = false;

        if let Some(existing) = atomic::read_json::<LockRecord>(&path) {
            let age = Utc::now() - existing.acquired_at;
            if age <= Duration::milliseconds(STALE_AFTER) {
                return Ok(LockOutcome::Held {
                    pid: existing.pid,
                    acquired_at: existing.acquired_at,
                });
            }
            warn!(
                pid = existing.pid,
                age_ms = age.num_milliseconds(),
                "Stealing stale scaling lock"
            );
            recovered_stale = true;
        }

        let record = LockRecord {
            pid: std::process::id(),
            token: ulid::Ulid::new().to_string(),
            acquired_at: Utc::now(),
        };
        atomic::write_json(&path, &record)?;
        Ok(LockOutcome::Acquired(ScalingLockGuard {
            token: record.token,
            recovered_stale,
        }))
    }

    pub fn release(&self, guard: ScalingLockGuard) -> Result<()> {
        let path = self.paths.scaling_lock_file();
        if let Some(existing) = atomic::read_json::<LockRecord>(&path) {
            if existing.token == guard.token {
                atomic::remove_file(&path)?;
            }
        }
        Ok(())
    }
}
