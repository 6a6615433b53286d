//! Per-worker mailboxes with delivery/notification marks.
//!
//! A mailbox is one JSON array per worker, rewritten whole on every append
//! (append-with-compaction). Sends also land a `message_received` entry in
//! the event log, and that write happens before any transport trigger the
//! runtime may follow up with.

use tracing::debug;

use foreman_common::{EventKind, MailboxMessage, Result, TeamEvent, BROADCAST};

use crate::atomic;
use crate::events::EventLog;
use crate::paths::TeamPaths;

#[derive(Debug, Clone)]
pub struct MailboxStore {
    paths: TeamPaths,
    events: EventLog,
    team: String,
}

impl MailboxStore {
    pub fn new(paths: TeamPaths, team: impl Into<String>) -> Self {
        let events = EventLog::new(paths.clone());
        Self {
            paths,
            events,
            team: team.into(),
        }
    }

    /// Send a direct message to one worker.
    pub fn send(
        &self,
        from_worker: &str,
        to_worker: &str,
        body: impl Into<String>,
    ) -> Result<MailboxMessage> {
        let message = MailboxMessage::new(from_worker, to_worker, body);
        let mut inbox = self.list(to_worker);
        inbox.push(message.clone());
        atomic::write_json(&self.paths.mailbox_file(to_worker), &inbox)?;

        self.events.append(
            &TeamEvent::new(&self.team, EventKind::MessageReceived)
                .with_worker(to_worker)
                .with_message(&message.message_id),
        )?;
        debug!(from = %from_worker, to = %to_worker, id = %message.message_id, "Message sent");
        Ok(message)
    }

    /// Fan a message out to every listed recipient except the sender.
    ///
    /// Each recipient gets its own message with a distinct id.
    pub fn broadcast(
        &self,
        from_worker: &str,
        recipients: &[String],
        body: &str,
    ) -> Result<Vec<MailboxMessage>> {
        let mut sent = Vec::new();
        for recipient in recipients {
            if recipient == from_worker || recipient == BROADCAST {
                continue;
            }
            sent.push(self.send(from_worker, recipient, body)?);
        }
        Ok(sent)
    }

    /// The full mailbox for a worker (empty when none exists).
    pub fn list(&self, worker: &str) -> Vec<MailboxMessage> {
        atomic::read_json(&self.paths.mailbox_file(worker)).unwrap_or_default()
    }

    /// Messages the runtime has not yet poked the recipient about.
    pub fn unnotified(&self, worker: &str) -> Vec<MailboxMessage> {
        self.list(worker)
            .into_iter()
            .filter(|m| !m.is_notified() && !m.is_delivered())
            .collect()
    }

    /// Mark a message consumed. Idempotent; returns whether anything changed.
    pub fn mark_delivered(&self, worker: &str, message_id: &str) -> Result<bool> {
        self.mark(worker, message_id, |m| {
            if m.delivered_at.is_none() {
                m.delivered_at = Some(chrono::Utc::now());
                true
            } else {
                false
            }
        })
    }

    /// Mark a message as nudged via the transport. Idempotent.
    pub fn mark_notified(&self, worker: &str, message_id: &str) -> Result<bool> {
        self.mark(worker, message_id, |m| {
            if m.notified_at.is_none() {
                m.notified_at = Some(chrono::Utc::now());
                true
            } else {
                false
            }
        })
    }

    fn mark(
        &self,
        worker: &str,
        message_id: &str,
        apply: impl Fn(&mut MailboxMessage) -> bool,
    ) -> Result<bool> {
        let mut inbox = self.list(worker);
        let mut changed = false;
        for message in inbox.iter_mut() {
            if message.message_id == message_id {
                changed = apply(message);
                break;
            }
        }
        if changed {
            atomic::write_json(&self.paths.mailbox_file(worker), &inbox)?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> MailboxStore {
        MailboxStore::new(TeamPaths::new(dir.path(), "t1"), "t1")
    }

    #[test]
    fn test_send_and_list() {
        let dir = TempDir::new().unwrap();
        let mailbox = store(&dir);
        mailbox.send("leader", "worker-1", "start with task 1").unwrap();
        mailbox.send("leader", "worker-1", "then task 2").unwrap();

        let inbox = mailbox.list("worker-1");
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].body, "start with task 1");
    }

    #[test]
    fn test_send_appends_event() {
        let dir = TempDir::new().unwrap();
        let mailbox = store(&dir);
        let msg = mailbox.send("leader", "worker-1", "hi").unwrap();

        let events = EventLog::new(TeamPaths::new(dir.path(), "t1")).read_all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::MessageReceived);
        assert_eq!(events[0].message_id.as_deref(), Some(msg.message_id.as_str()));
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let dir = TempDir::new().unwrap();
        let mailbox = store(&dir);
        let recipients = vec![
            "worker-1".to_string(),
            "worker-2".to_string(),
            "worker-3".to_string(),
        ];
        let sent = mailbox.broadcast("worker-2", &recipients, "sync up").unwrap();
        assert_eq!(sent.len(), 2);
        assert!(mailbox.list("worker-2").is_empty());
        assert_ne!(sent[0].message_id, sent[1].message_id);
    }

    #[test]
    fn test_mark_delivered_idempotent() {
        let dir = TempDir::new().unwrap();
        let mailbox = store(&dir);
        let msg = mailbox.send("leader", "worker-1", "hi").unwrap();

        assert!(mailbox.mark_delivered("worker-1", &msg.message_id).unwrap());
        assert!(!mailbox.mark_delivered("worker-1", &msg.message_id).unwrap());
        assert!(mailbox.list("worker-1")[0].is_delivered());
    }

    #[test]
    fn test_delivered_message_leaves_notify_set() {
        let dir = TempDir::new().unwrap();
        let mailbox = store(&dir);
        let a = mailbox.send("leader", "worker-1", "one").unwrap();
        let _b = mailbox.send("leader", "worker-1", "two").unwrap();

        mailbox.mark_delivered("worker-1", &a.message_id).unwrap();
        let pending = mailbox.unnotified("worker-1");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body, "two");
    }

    #[test]
    fn test_mark_notified_separates_from_delivered() {
        let dir = TempDir::new().unwrap();
        let mailbox = store(&dir);
        let msg = mailbox.send("leader", "worker-1", "hi").unwrap();

        assert!(mailbox.mark_notified("worker-1", &msg.message_id).unwrap());
        let inbox = mailbox.list("worker-1");
        assert!(inbox[0].is_notified());
        assert!(!inbox[0].is_delivered());
        assert!(mailbox.unnotified("worker-1").is_empty());
    }
}
