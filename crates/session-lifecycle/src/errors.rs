use thiserror::Error;

use crate::types::{DialogId, InvState, SessionId};

/// Result type for session lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Session lifecycle errors
///
/// `InvalidState` is always a caller contract violation: some code path used a
/// session after the release that tore it down. It is reported, never retried.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Session {0} has no live reference counter")]
    InvalidState(SessionId),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: InvState, to: InvState },

    #[error("Disconnecting session {0} requires a status code cause")]
    MissingCause(SessionId),

    #[error("Pool exhausted: {pool} (requested {requested} bytes, capacity {capacity})")]
    PoolExhausted {
        pool: String,
        requested: usize,
        capacity: usize,
    },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Dialog {0} is terminated")]
    DialogTerminated(DialogId),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
