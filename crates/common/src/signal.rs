//! Shutdown request/ack rendezvous records.
//!
//! The coordinator writes a request (`shutdown-request.json`); the worker's
//! local loop answers with an ack (`shutdown-ack.json`, overwritten on every
//! answer). Because acks can survive from previous runs, readers must check
//! `ack.updated_at >= request.requested_at` before trusting one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownRequest {
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
}

impl ShutdownRequest {
    pub fn new(requested_by: impl Into<String>) -> Self {
        Self {
            requested_by: requested_by.into(),
            requested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownAck {
    pub status: AckStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl ShutdownAck {
    pub fn accept() -> Self {
        Self {
            status: AckStatus::Accept,
            reason: None,
            updated_at: Utc::now(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Reject,
            reason: Some(reason.into()),
            updated_at: Utc::now(),
        }
    }

    /// Whether this ack is fresh relative to the given request time.
    pub fn is_fresh(&self, min_updated_at: DateTime<Utc>) -> bool {
        self.updated_at >= min_updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_stale_ack_rejected() {
        let req = ShutdownRequest::new("leader");
        let mut ack = ShutdownAck::accept();
        ack.updated_at = req.requested_at - Duration::seconds(10);
        assert!(!ack.is_fresh(req.requested_at));

        ack.updated_at = req.requested_at + Duration::seconds(1);
        assert!(ack.is_fresh(req.requested_at));
    }
}
