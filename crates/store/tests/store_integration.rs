//! Integration tests driving the stores together the way the runtime does:
//! manifest counters feeding task creation, claims racing, leases expiring,
//! and mailboxes notifying.

use chrono::{Duration, Utc};
use tempfile::TempDir;

use foreman_common::{
    LeaderIdentity, ShutdownAck, TaskStatus, TeamManifest, WorkerHeartbeat, WorkerIdentity,
};
use foreman_store::{
    ClaimOutcome, EventLog, MailboxStore, ManifestStore, SignalStore, TaskStore, TeamPaths,
    WorkerStore,
};

fn leader() -> LeaderIdentity {
    LeaderIdentity {
        session_id: "sess".into(),
        worker_id: "leader".into(),
        role: "lead".into(),
    }
}

struct Fixture {
    _dir: TempDir,
    manifest: ManifestStore,
    tasks: TaskStore,
    mailbox: MailboxStore,
    workers: WorkerStore,
    signals: SignalStore,
    events: EventLog,
}

fn fixture(lease_ms: i64) -> Fixture {
    let dir = TempDir::new().unwrap();
    let paths = TeamPaths::new(dir.path(), "t1");

    let manifest = ManifestStore::new(paths.clone());
    let mut m = TeamManifest::new("t1", "build it", leader(), "foreman-t1", "executor");
    for index in 1..=2u64 {
        let idx = m.allocate_worker_index();
        assert_eq!(idx, index);
        m.workers
            .push(WorkerIdentity::new(idx, "executor", format!("%{}", idx + 1)));
    }
    m.worker_count = 2;
    m.initial_worker_count = 2;
    m.active_worker_count = 2;
    manifest.save(&m).unwrap();

    Fixture {
        manifest,
        tasks: TaskStore::new(paths.clone(), lease_ms),
        mailbox: MailboxStore::new(paths.clone(), "t1"),
        workers: WorkerStore::new(paths.clone()),
        signals: SignalStore::new(paths.clone()),
        events: EventLog::new(paths),
        _dir: dir,
    }
}

#[test]
fn bootstrap_counters_and_first_claim() {
    let fx = fixture(900_000);
    let t1 = fx.tasks.create(&fx.manifest, "do A", "", vec![], false).unwrap();
    let t2 = fx.tasks.create(&fx.manifest, "do B", "", vec![], false).unwrap();

    let m = fx.manifest.load().unwrap();
    assert_eq!(m.active_worker_count, 2);
    assert_eq!(m.next_task_id, 3);
    assert_eq!(t1.status, TaskStatus::Pending);
    assert_eq!(t2.status, TaskStatus::Pending);

    // worker-1 claims T1.
    let claimed = match fx.tasks.claim(&fx.manifest, &t1.id, "worker-1") {
        ClaimOutcome::Claimed { task } => task,
        other => panic!("expected claim, got {other:?}"),
    };
    assert_eq!(claimed.status, TaskStatus::InProgress);
    assert_eq!(claimed.claim.as_ref().unwrap().worker, "worker-1");
    assert_eq!(claimed.version, 2);

    // worker-2's attempt conflicts.
    assert!(matches!(
        fx.tasks.claim(&fx.manifest, &t1.id, "worker-2"),
        ClaimOutcome::Conflict { .. }
    ));
}

#[test]
fn lease_expiry_frees_task_for_another_worker() {
    let fx = fixture(50);
    let t1 = fx.tasks.create(&fx.manifest, "do A", "", vec![], false).unwrap();

    fx.workers
        .write_heartbeat("worker-1", &WorkerHeartbeat::started(u32::MAX - 1))
        .unwrap();
    let claimed = match fx.tasks.claim(&fx.manifest, &t1.id, "worker-1") {
        ClaimOutcome::Claimed { task } => task,
        other => panic!("{other:?}"),
    };
    assert_eq!(claimed.version, 2);

    // worker-1's process dies; after the lease lapses the sweep frees T1.
    let later = Utc::now() + Duration::milliseconds(100);
    let expired = fx.tasks.expire_leases(later, &["worker-1".to_string()]);
    assert_eq!(expired, vec![t1.id.clone()]);

    let after = fx.tasks.get(&t1.id).unwrap();
    assert_eq!(after.status, TaskStatus::Pending);
    assert!(after.claim.is_none());
    assert_eq!(after.version, 3);

    assert!(matches!(
        fx.tasks.claim(&fx.manifest, &t1.id, "worker-2"),
        ClaimOutcome::Claimed { .. }
    ));
}

#[test]
fn persisted_entities_roundtrip() {
    let fx = fixture(900_000);
    let task = fx
        .tasks
        .create(&fx.manifest, "subject", "long description", vec![], true)
        .unwrap();
    let read = fx.tasks.get(&task.id).unwrap();
    assert_eq!(read.subject, task.subject);
    assert_eq!(read.version, task.version);
    assert!(read.requires_code_change);

    let msg = fx.mailbox.send("leader", "worker-1", "hello").unwrap();
    let inbox = fx.mailbox.list("worker-1");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].message_id, msg.message_id);
    assert_eq!(inbox[0].body, "hello");
}

#[test]
fn mailbox_delivery_marks_are_observable_and_idempotent() {
    let fx = fixture(900_000);
    let msg = fx.mailbox.send("worker-1", "worker-2", "ping").unwrap();

    assert!(fx.mailbox.mark_delivered("worker-2", &msg.message_id).unwrap());
    // Second mark is a no-change.
    assert!(!fx.mailbox.mark_delivered("worker-2", &msg.message_id).unwrap());
    assert!(fx.mailbox.list("worker-2")[0].is_delivered());

    // Delivery events landed in the log before any notification could.
    let events = fx.events.read_all();
    assert!(!events.is_empty());
}

#[test]
fn shutdown_ack_freshness_rendezvous() {
    let fx = fixture(900_000);

    // Ack left over from a previous run, older than the request.
    let mut old_ack = ShutdownAck::accept();
    old_ack.updated_at = Utc::now() - Duration::seconds(50);
    fx.signals.write_ack("worker-1", &old_ack).unwrap();

    let request = fx.signals.request_shutdown("worker-1", "leader").unwrap();
    assert!(fx
        .signals
        .read_ack_with_min("worker-1", request.requested_at)
        .is_none());

    fx.signals
        .write_ack("worker-1", &ShutdownAck::accept())
        .unwrap();
    let ack = fx
        .signals
        .read_ack_with_min("worker-1", request.requested_at)
        .unwrap();
    assert!(ack.updated_at >= request.requested_at);
}

#[test]
fn worker_indexes_never_reused_after_removal() {
    let fx = fixture(900_000);

    // Remove worker-2, then add a new worker: it gets index 3, not 2.
    fx.manifest
        .update(|m| {
            m.workers.retain(|w| w.name != "worker-2");
            m.active_worker_count -= 1;
        })
        .unwrap();

    let index = fx.manifest.update(|m| m.allocate_worker_index()).unwrap();
    assert_eq!(index, 3);
    let m = fx.manifest.load().unwrap();
    assert_eq!(m.next_worker_index, 4);

    let mut seen: Vec<u64> = m.workers.iter().map(|w| w.index).collect();
    seen.push(index);
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 2, "indexes stay unique across remove+add");
}
