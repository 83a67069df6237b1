//! Reference-counted lifecycle management for INVITE sessions
//!
//! An INVITE session is shared by several threads: the protocol state machine,
//! the transaction layer, extensions and application code. This crate decides
//! when it is safe to free such a session without putting a global lock on the
//! state-transition path.
//!
//! The architecture consists of:
//! - Reference Counter: wait-free atomic counter with explicit destruction
//! - Session: the INVITE session and the resources it owns
//! - Lifecycle: `add_ref` / `dec_ref` and the teardown they guard
//! - Builder: constructs sessions and takes the creator's reference
//! - Registry: concurrent index holding one reference per stored session
//!
//! The state machine owns one ordinary reference for the session's active
//! life and gives it up on the transition into `Disconnected`. Teardown runs
//! in whichever release brings the count to zero, exactly once.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rvoip_session_lifecycle::{Dialog, InvState, ReleaseStatus, SessionBuilder};
//!
//! # fn main() -> rvoip_session_lifecycle::Result<()> {
//! let dialog = Arc::new(Dialog::new("a84b4c76e66710@pc33.example.com"));
//! let session = SessionBuilder::new().create_uac(dialog)?;
//!
//! // Another component keeps the session alive past the disconnect
//! let media = session.acquire()?;
//! session.set_state(InvState::Calling, None)?;
//! assert_eq!(session.terminate(200)?, Some(ReleaseStatus::Success));
//! assert_eq!(media.release()?, ReleaseStatus::Gone);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod dialog;
pub mod errors;
pub mod extensions;
pub mod history;
pub mod message;
pub mod pool;
pub mod refcount;
pub mod registry;
pub mod session;
pub mod types;

pub use builder::SessionBuilder;
pub use config::{PoolConfig, Refresher, SessionConfig};
pub use dialog::{Dialog, DialogAssociation};
pub use errors::{LifecycleError, Result};
pub use extensions::{ReliableProvisional, SessionExtension, SessionTimer};
pub use history::TransitionRecord;
pub use message::{MessageSlot, Method, ReleaseHook, TxData};
pub use pool::{CachingPoolFactory, FlipFlopPools, MemoryPool, PoolFactory, PoolRole};
pub use refcount::RefCounter;
pub use registry::{RegistryStats, SessionRegistry};
pub use session::{InviteSession, ReleaseStatus, SessionObserver, SessionRef};
pub use types::{DialogId, InvState, Role, SessionId};
