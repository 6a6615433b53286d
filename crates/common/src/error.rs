//! Error types for foreman.
//!
//! Only genuinely exceptional conditions live here. Expected outcomes that a
//! caller is meant to branch on (claim conflicts, blocked dependencies,
//! shutdown gates, resource denials) are modeled as structured result enums
//! next to the operations that produce them.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForemanError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Terminal multiplexer unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Spawner error: {0}")]
    Spawner(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Team not found: {0}")]
    TeamNotFound(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForemanError>;
