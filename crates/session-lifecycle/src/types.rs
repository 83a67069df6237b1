//! Core types for session lifecycle management
//!
//! Identifiers, roles and the INVITE session state enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("inv-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dialog ID type
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct DialogId(pub uuid::Uuid);

impl DialogId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for DialogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the INVITE transaction created the session
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Role {
    /// User Agent Client (sent the INVITE)
    Uac,
    /// User Agent Server (received the INVITE)
    Uas,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Uac => write!(f, "UAC"),
            Role::Uas => write!(f, "UAS"),
        }
    }
}

/// INVITE session states
///
/// Variants are declared in progression order; a session never moves to a
/// state that orders before its current one.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InvState {
    /// Created, no INVITE sent or received yet
    Null,
    /// UAC sent the INVITE
    Calling,
    /// UAS received the INVITE
    Incoming,
    /// Provisional response with To tag exchanged
    Early,
    /// 2xx sent or received, waiting for ACK
    Connecting,
    /// ACK sent or received
    Confirmed,
    /// Terminal state
    Disconnected,
}

impl InvState {
    /// Check if this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvState::Disconnected)
    }
}

impl fmt::Display for InvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvState::Null => write!(f, "Null"),
            InvState::Calling => write!(f, "Calling"),
            InvState::Incoming => write!(f, "Incoming"),
            InvState::Early => write!(f, "Early"),
            InvState::Connecting => write!(f, "Connecting"),
            InvState::Confirmed => write!(f, "Confirmed"),
            InvState::Disconnected => write!(f, "Disconnected"),
        }
    }
}
