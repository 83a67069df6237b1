//! Owning dialog association
//!
//! A dialog counts the sessions that use it. Sessions register on construction
//! and deregister as step four of their teardown. The dialog never frees
//! session memory; it only tracks usage and terminates itself when the last
//! session is gone.
//!
//! The dialog also carries the per-dialog lock that serializes session field
//! mutation. The lock is not reentrant.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::errors::{LifecycleError, Result};
use crate::types::{DialogId, SessionId};

/// Dialog-side contract used by INVITE sessions
pub trait DialogAssociation: Send + Sync {
    fn id(&self) -> DialogId;

    /// Register a session as a user of this dialog
    fn inc_session(&self, session_id: &SessionId) -> Result<()>;

    /// Deregister a session during its teardown
    fn dec_session(&self, session_id: &SessionId);
}

/// A SIP dialog as seen by the sessions it owns
#[derive(Debug)]
pub struct Dialog {
    id: DialogId,
    call_id: String,
    session_count: AtomicUsize,
    terminated: AtomicBool,
    lock: Mutex<()>,
}

impl Dialog {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            id: DialogId::new(),
            call_id: call_id.into(),
            session_count: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Number of sessions currently using the dialog
    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Acquire the per-dialog lock that serializes session field mutation
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DialogAssociation for Dialog {
    fn id(&self) -> DialogId {
        self.id
    }

    fn inc_session(&self, session_id: &SessionId) -> Result<()> {
        if self.is_terminated() {
            warn!("Session {} rejected by terminated dialog {}", session_id, self.id);
            return Err(LifecycleError::DialogTerminated(self.id));
        }
        let count = self.session_count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Dialog {} session count {} (+{})", self.id, count, session_id);
        Ok(())
    }

    fn dec_session(&self, session_id: &SessionId) {
        let prev = self
            .session_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
        match prev {
            Ok(1) => {
                self.terminated.store(true, Ordering::SeqCst);
                info!(
                    "Dialog {} (Call-ID {}) terminated: last session {} gone",
                    self.id, self.call_id, session_id
                );
            }
            Ok(prev) => {
                debug!("Dialog {} session count {} (-{})", self.id, prev - 1, session_id);
            }
            Err(_) => {
                warn!("Dialog {} has no session to remove for {}", self.id, session_id);
            }
        }
    }
}
