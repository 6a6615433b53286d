//! Common types shared across the foreman crates.
//!
//! This crate defines the persisted data model (everything that lands as a
//! JSON file under a team's state root) and the error taxonomy that the
//! store, transport, and runtime crates build on.

pub mod approval;
pub mod error;
pub mod event;
pub mod manifest;
pub mod message;
pub mod monitor;
pub mod scaling;
pub mod signal;
pub mod task;
pub mod worker;

pub use approval::{ApprovalDecision, ApprovalRecord};
pub use error::{ForemanError, Result};
pub use event::{EventKind, TeamEvent};
pub use manifest::{
    DisplayMode, LeaderIdentity, PermissionsSnapshot, ResourceLimits, TeamManifest, TeamPolicy,
    SCHEMA_VERSION,
};
pub use message::{MailboxMessage, BROADCAST};
pub use monitor::{MonitorSnapshot, PhaseTransition, TaskCounts, TeamPhase, TickTimings};
pub use scaling::{
    ResourceSnapshot, ScalingAction, ScalingEvent, ScalingPolicy, ScalingRecommendation,
    ScalingTrigger,
};
pub use signal::{AckStatus, ShutdownAck, ShutdownRequest};
pub use task::{TaskClaim, TaskRecord, TaskStatus};
pub use worker::{WorkerHeartbeat, WorkerIdentity, WorkerState, WorkerStatusRecord};
