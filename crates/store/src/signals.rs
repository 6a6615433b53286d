//! Shutdown request/ack rendezvous.
//!
//! The coordinator writes the request before it ever reads for an ack, and
//! ack reads are filtered by `min_updated_at` so an ack file surviving from
//! a previous run is never mistaken for an answer.

use chrono::{DateTime, Utc};

use foreman_common::{Result, ShutdownAck, ShutdownRequest};

use crate::atomic;
use crate::paths::TeamPaths;

#[derive(Debug, Clone)]
pub struct SignalStore {
    paths: TeamPaths,
}

impl SignalStore {
    pub fn new(paths: TeamPaths) -> Self {
        Self { paths }
    }

    /// Write a shutdown request for a worker, returning the request (whose
    /// `requested_at` is the freshness floor for acks).
    pub fn request_shutdown(&self, worker: &str, requested_by: &str) -> Result<ShutdownRequest> {
        let request = ShutdownRequest::new(requested_by);
        atomic::write_json(&self.paths.shutdown_request_file(worker), &request)?;
        Ok(request)
    }

    pub fn read_request(&self, worker: &str) -> Option<ShutdownRequest> {
        atomic::read_json(&self.paths.shutdown_request_file(worker))
    }

    /// Written by the worker's local loop; overwrites any previous ack.
    pub fn write_ack(&self, worker: &str, ack: &ShutdownAck) -> Result<()> {
        atomic::write_json(&self.paths.shutdown_ack_file(worker), ack)
    }

    /// Read the worker's ack, but only if it is at least as new as
    /// `min_updated_at`. Stale acks read as absent.
    pub fn read_ack_with_min(
        &self,
        worker: &str,
        min_updated_at: DateTime<Utc>,
    ) -> Option<ShutdownAck> {
        let ack: ShutdownAck = atomic::read_json(&self.paths.shutdown_ack_file(worker))?;
        ack.is_fresh(min_updated_at).then_some(ack)
    }

    /// Drop both signal files for a worker.
    pub fn clear(&self, worker: &str) -> Result<()> {
        atomic::remove_file(&self.paths.shutdown_request_file(worker))?;
        atomic::remove_file(&self.paths.shutdown_ack_file(worker))
    }
}
