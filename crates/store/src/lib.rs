//! Filesystem-backed team state.
//!
//! Every persisted entity is a small JSON file under the team's state root;
//! all mutations go through write-temp-then-rename, and readers tolerate
//! missing or torn files by returning `None`. The stores here are
//! synchronous: files are tiny, and the runtime wraps calls from
//! its async tasks.

pub mod approvals;
pub mod atomic;
pub mod events;
pub mod index;
pub mod lock;
pub mod mailbox;
pub mod manifest;
pub mod panes;
pub mod paths;
pub mod scaling;
pub mod signals;
pub mod tasks;
pub mod workers;

pub use approvals::ApprovalStore;
pub use events::EventLog;
pub use index::TeamIndex;
pub use lock::{LockOutcome, ScalingLock, ScalingLockGuard};
pub use mailbox::MailboxStore;
pub use manifest::ManifestStore;
pub use panes::{PanesRecord, PanesStore};
pub use paths::TeamPaths;
pub use scaling::ScalingHistory;
pub use signals::SignalStore;
pub use tasks::{
    ClaimOutcome, Readiness, ReleaseOutcome, TaskPatch, TaskStore, TransitionOutcome,
    UpdateOutcome,
};
pub use workers::{is_observed_dead, pid_alive, WorkerStore};
