//! Mailbox messages exchanged between the leader and workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recipient sentinel for broadcast fan-out.
pub const BROADCAST: &str = "*";

/// A single mailbox message (element of `mailbox/<worker>.json`).
///
/// `delivered_at` means the recipient has consumed the message;
/// `notified_at` means the runtime has poked the recipient's slot to look at
/// it. A delivered message stays readable but leaves the to-notify set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxMessage {
    pub message_id: String,
    pub from_worker: String,
    pub to_worker: String,
    pub body: String,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl MailboxMessage {
    pub fn new(
        from_worker: impl Into<String>,
        to_worker: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            from_worker: from_worker.into(),
            to_worker: to_worker.into(),
            body: body.into(),
            created_at: Utc::now(),
            notified_at: None,
            delivered_at: None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }

    pub fn is_notified(&self) -> bool {
        self.notified_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_is_unread() {
        let m = MailboxMessage::new("leader", "worker-1", "hello");
        assert!(!m.is_delivered());
        assert!(!m.is_notified());
        assert!(!m.message_id.is_empty());
    }

    #[test]
    fn test_distinct_message_ids() {
        let a = MailboxMessage::new("leader", "worker-1", "x");
        let b = MailboxMessage::new("leader", "worker-1", "x");
        assert_ne!(a.message_id, b.message_id);
    }
}
