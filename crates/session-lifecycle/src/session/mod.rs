//! INVITE session object
//!
//! An [`InviteSession`] is shared by the protocol state machine, the
//! transaction layer, extensions and application code. Its resources (outbound
//! messages, the two alternating pools, extension subscriptions and the dialog
//! association) stay valid for as long as its reference count is above zero.
//!
//! Field mutation is serialized by the owning dialog's lock, which callers are
//! expected to hold. The reference count is what lets a caller drop that lock,
//! do some work, and come back to a session that is still there.

mod lifecycle;

pub use lifecycle::{ReleaseStatus, SessionRef};

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info};

use crate::dialog::DialogAssociation;
use crate::errors::{LifecycleError, Result};
use crate::extensions::SessionExtension;
use crate::history::{SessionHistory, TransitionRecord};
use crate::message::{MessageSlot, TxData};
use crate::pool::{FlipFlopPools, MemoryPool, PoolFactory, PoolRole};
use crate::refcount::RefCounter;
use crate::types::{DialogId, InvState, Role, SessionId};

/// Receives state change notifications from INVITE sessions
///
/// Called without any session lock held and before the state machine gives
/// up its own reference on the terminal edge, so an observer may still
/// acquire a reference to keep the session alive.
pub trait SessionObserver: Send + Sync {
    fn on_state_changed(&self, session: &Arc<InviteSession>, old_state: InvState, new_state: InvState);
}

/// Resources that teardown takes out of the session
struct SessionInner {
    state: InvState,
    cause: Option<u16>,
    last_ack: Option<Arc<TxData>>,
    invite_req: Option<Arc<TxData>>,
    pending_bye: Option<Arc<TxData>>,
    pools: Option<FlipFlopPools>,
    reliability: Option<Arc<dyn SessionExtension>>,
    timer: Option<Arc<dyn SessionExtension>>,
    dialog: Option<Arc<dyn DialogAssociation>>,
    history: SessionHistory,
}

/// Parts assembled by the builder before the reference counter exists
pub(crate) struct SessionParts {
    pub id: SessionId,
    pub role: Role,
    pub initial_state: InvState,
    pub dialog: Arc<dyn DialogAssociation>,
    pub pools: FlipFlopPools,
    pub pool_factory: Arc<dyn PoolFactory>,
    pub reliability: Option<Arc<dyn SessionExtension>>,
    pub timer: Option<Arc<dyn SessionExtension>>,
    pub observer: Option<Arc<dyn SessionObserver>>,
    pub history_limit: usize,
}

/// A reference-counted INVITE session
pub struct InviteSession {
    id: SessionId,
    role: Role,
    dialog_id: DialogId,
    pool_factory: Arc<dyn PoolFactory>,
    observer: Option<Arc<dyn SessionObserver>>,
    /// Allocated on its own, never from the session pools, so it can outlive them
    ref_count: OnceLock<RefCounter>,
    inner: Mutex<SessionInner>,
}

impl InviteSession {
    pub(crate) fn from_parts(parts: SessionParts) -> Arc<Self> {
        let mut history = SessionHistory::new(parts.history_limit);
        if parts.initial_state != InvState::Null {
            history.record(InvState::Null, parts.initial_state, None);
        }

        Arc::new(Self {
            id: parts.id,
            role: parts.role,
            dialog_id: parts.dialog.id(),
            pool_factory: parts.pool_factory,
            observer: parts.observer,
            ref_count: OnceLock::new(),
            inner: Mutex::new(SessionInner {
                state: parts.initial_state,
                cause: None,
                last_ack: None,
                invite_req: None,
                pending_bye: None,
                pools: Some(parts.pools),
                reliability: parts.reliability,
                timer: parts.timer,
                dialog: Some(parts.dialog),
                history,
            }),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn dialog_id(&self) -> DialogId {
        self.dialog_id
    }

    pub fn state(&self) -> InvState {
        self.lock_inner().state
    }

    /// Status code of the last response or termination, if any
    pub fn cause(&self) -> Option<u16> {
        self.lock_inner().cause
    }

    /// Current reference count, or `None` once the counter is destroyed
    pub fn ref_count(&self) -> Option<usize> {
        self.ref_count
            .get()
            .filter(|c| !c.is_destroyed())
            .map(RefCounter::value)
    }

    /// Whether teardown has run
    pub fn is_destroyed(&self) -> bool {
        self.ref_count.get().map(RefCounter::is_destroyed).unwrap_or(false)
    }

    /// Retained state transitions, oldest first
    pub fn history(&self) -> Vec<TransitionRecord> {
        self.lock_inner().history.transitions().cloned().collect()
    }

    fn lock_inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drive the session to `new_state`.
    ///
    /// On the non-terminal to terminal edge the state machine's own reference
    /// is released here and the release status is returned. Re-entering the
    /// terminal state is ignored and returns `Ok(None)`.
    pub fn set_state(self: &Arc<Self>, new_state: InvState, cause: Option<u16>) -> Result<Option<ReleaseStatus>> {
        let old_state = {
            let mut inner = self.lock_inner();
            let old_state = inner.state;

            if old_state.is_terminal() && new_state.is_terminal() {
                debug!("Session {} already {}, ignoring duplicate", self.id, new_state);
                return Ok(None);
            }
            if new_state < old_state {
                return Err(LifecycleError::InvalidTransition {
                    from: old_state,
                    to: new_state,
                });
            }

            let cause = cause.or(inner.cause);
            if new_state.is_terminal() && cause.is_none() {
                return Err(LifecycleError::MissingCause(self.id.clone()));
            }

            inner.cause = cause;
            inner.state = new_state;
            inner.history.record(old_state, new_state, cause);
            old_state
        };

        info!("Session {} state {} -> {}", self.id, old_state, new_state);

        if let Some(observer) = &self.observer {
            observer.on_state_changed(self, old_state, new_state);
        }

        if new_state.is_terminal() {
            // The state machine's implicit hold ends here; teardown waits for
            // every other holder.
            return self.dec_ref().map(Some);
        }
        Ok(None)
    }

    /// Disconnect the session with the given status code
    pub fn terminate(self: &Arc<Self>, cause: u16) -> Result<Option<ReleaseStatus>> {
        self.set_state(InvState::Disconnected, Some(cause))
    }

    /// Store an outbound message, replacing any previous one in the slot
    pub fn store_message(&self, slot: MessageSlot, tx: Arc<TxData>) -> Result<()> {
        if tx.method() != slot.expected_method() {
            return Err(LifecycleError::InvalidMessage(format!(
                "cannot store {} in {:?} slot",
                tx.method(),
                slot
            )));
        }
        self.ensure_live()?;
        let mut inner = self.lock_inner();
        let previous = match slot {
            MessageSlot::LastAck => inner.last_ack.replace(tx),
            MessageSlot::InviteRequest => inner.invite_req.replace(tx),
            MessageSlot::PendingBye => inner.pending_bye.replace(tx),
        };
        if let Some(previous) = previous {
            debug!("Session {} replaced {:?} ({})", self.id, slot, previous);
        }
        Ok(())
    }

    /// Get the message stored in a slot
    pub fn message(&self, slot: MessageSlot) -> Option<Arc<TxData>> {
        let inner = self.lock_inner();
        match slot {
            MessageSlot::LastAck => inner.last_ack.clone(),
            MessageSlot::InviteRequest => inner.invite_req.clone(),
            MessageSlot::PendingBye => inner.pending_bye.clone(),
        }
    }

    /// Remove the message stored in a slot, e.g. once a pending BYE is sent
    pub fn take_message(&self, slot: MessageSlot) -> Option<Arc<TxData>> {
        let mut inner = self.lock_inner();
        match slot {
            MessageSlot::LastAck => inner.last_ack.take(),
            MessageSlot::InviteRequest => inner.invite_req.take(),
            MessageSlot::PendingBye => inner.pending_bye.take(),
        }
    }

    /// Run `f` against one of the session pools
    pub fn with_pool<R>(&self, role: PoolRole, f: impl FnOnce(&mut MemoryPool) -> R) -> Result<R> {
        let mut inner = self.lock_inner();
        match inner.pools.as_mut() {
            Some(pools) => Ok(f(pools.get_mut(role))),
            None => Err(LifecycleError::InvalidState(self.id.clone())),
        }
    }

    /// Promote the provisional pool after a completed offer/answer exchange
    pub fn swap_pools(&self) -> Result<u64> {
        let mut inner = self.lock_inner();
        match inner.pools.as_mut() {
            Some(pools) => {
                pools.swap();
                Ok(pools.generation())
            }
            None => Err(LifecycleError::InvalidState(self.id.clone())),
        }
    }

    /// Reliability extension, while attached
    pub fn reliability(&self) -> Option<Arc<dyn SessionExtension>> {
        self.lock_inner().reliability.clone()
    }

    /// Session timer extension, while attached
    pub fn session_timer(&self) -> Option<Arc<dyn SessionExtension>> {
        self.lock_inner().timer.clone()
    }
}

impl fmt::Debug for InviteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InviteSession")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("dialog_id", &self.dialog_id)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
