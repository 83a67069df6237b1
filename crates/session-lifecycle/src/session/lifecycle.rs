//! Reference acquisition, release and teardown for INVITE sessions
//!
//! Every component that stores a session handle acquires a reference first
//! and releases it when done. The release whose decrement reaches zero runs
//! teardown synchronously and reports [`ReleaseStatus::Gone`]; the atomic
//! decrement guarantees exactly one release sees zero.
//!
//! Acquiring is only valid while the caller already holds a reference (or
//! holds the dialog lock while storing the first one). Nothing here locks to
//! enforce that.

use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::InviteSession;
use crate::errors::{LifecycleError, Result};
use crate::refcount::RefCounter;

/// Outcome of releasing a session reference
#[must_use = "Gone means the session handle must not be used again"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    /// Other references remain; the caller must not use its released one
    Success,
    /// This release reached zero and tore the session down
    Gone,
}

impl ReleaseStatus {
    pub fn is_gone(&self) -> bool {
        matches!(self, ReleaseStatus::Gone)
    }
}

impl InviteSession {
    /// Create the counter at zero and take the creator's reference.
    ///
    /// Called once by the builder after every fallible construction step.
    pub(crate) fn activate(&self) -> Result<()> {
        if self.ref_count.set(RefCounter::create(0)).is_err() {
            return Err(LifecycleError::InvalidState(self.id.clone()));
        }
        self.add_ref()
    }

    pub(crate) fn ensure_live(&self) -> Result<&RefCounter> {
        match self.ref_count.get() {
            Some(counter) if !counter.is_destroyed() => Ok(counter),
            _ => {
                error!("Session {} used after its reference counter was destroyed", self.id);
                Err(LifecycleError::InvalidState(self.id.clone()))
            }
        }
    }

    /// Acquire a reference to the session
    pub fn add_ref(&self) -> Result<()> {
        let counter = self.ensure_live()?;
        counter.increment();
        debug!("Session {} add_ref -> {}", self.id, counter.value());
        Ok(())
    }

    /// Release a reference to the session
    ///
    /// Returns [`ReleaseStatus::Gone`] if this release tore the session down.
    ///
    /// # Panics
    ///
    /// Panics if the count is already zero, which means references were
    /// released more often than acquired.
    pub fn dec_ref(&self) -> Result<ReleaseStatus> {
        let counter = self.ensure_live()?;
        let remaining = counter.decrement_and_get();
        debug!("Session {} dec_ref -> {}", self.id, remaining);

        if remaining > 0 {
            return Ok(ReleaseStatus::Success);
        }

        self.teardown(counter);
        Ok(ReleaseStatus::Gone)
    }

    /// Acquire a reference owned by a guard
    pub fn acquire(self: &Arc<Self>) -> Result<SessionRef> {
        self.add_ref()?;
        Ok(SessionRef {
            session: Arc::clone(self),
            released: false,
        })
    }

    /// Free every resource the session owns. Runs once, on the thread whose
    /// release reached zero.
    fn teardown(&self, counter: &RefCounter) {
        info!("Destroying session {}", self.id);

        let (messages, reliability, timer, dialog, pools) = {
            let mut inner = self.lock_inner();
            (
                [
                    ("pending BYE", inner.pending_bye.take()),
                    ("INVITE", inner.invite_req.take()),
                    ("last ACK", inner.last_ack.take()),
                ],
                inner.reliability.take(),
                inner.timer.take(),
                inner.dialog.take(),
                inner.pools.take(),
            )
        };

        for (label, tx) in messages {
            if let Some(tx) = tx {
                debug!("Session {} releasing {} {}", self.id, label, tx);
                drop(tx);
            }
        }

        // Extensions may point into pool memory
        for extension in [reliability, timer].into_iter().flatten() {
            extension.end_session(&self.id);
            debug!("Session {} detached {} extension", self.id, extension.name());
        }

        if let Some(dialog) = dialog {
            dialog.dec_session(&self.id);
        }

        if let Some(pools) = pools {
            pools.release(self.pool_factory.as_ref());
        }

        counter.destroy();
        info!("Session {} destroyed", self.id);
    }
}

/// A counted reference to an [`InviteSession`]
///
/// Releases on drop unless [`release`](SessionRef::release) was called. Use
/// `release` where the caller needs to see [`ReleaseStatus::Gone`].
#[derive(Debug)]
pub struct SessionRef {
    session: Arc<InviteSession>,
    released: bool,
}

impl SessionRef {
    /// Release the reference and report whether it tore the session down
    pub fn release(mut self) -> Result<ReleaseStatus> {
        self.released = true;
        self.session.dec_ref()
    }
}

impl Deref for SessionRef {
    type Target = Arc<InviteSession>;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl Drop for SessionRef {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.session.dec_ref() {
            Ok(ReleaseStatus::Gone) => debug!("Session {} gone on reference drop", self.session.id),
            Ok(ReleaseStatus::Success) => {}
            Err(e) => error!("Dropping session reference failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SessionBuilder;
    use crate::dialog::Dialog;
    use crate::message::{Method, MessageSlot, TxData};
    use crate::pool::CachingPoolFactory;
    use crate::types::InvState;

    fn new_session(factory: Arc<CachingPoolFactory>) -> (Arc<Dialog>, Arc<InviteSession>) {
        let dialog = Arc::new(Dialog::new("lifecycle@test"));
        let session = SessionBuilder::new()
            .with_pool_factory(factory)
            .enable_100rel(true)
            .enable_session_timer(true)
            .create_uac(dialog.clone())
            .unwrap();
        (dialog, session)
    }

    #[test]
    fn test_creator_holds_first_reference() {
        let (_dialog, session) = new_session(Arc::new(CachingPoolFactory::new()));
        assert_eq!(session.ref_count(), Some(1));
        assert!(!session.is_destroyed());
    }

    #[test]
    fn test_release_to_zero_tears_down() {
        let factory = Arc::new(CachingPoolFactory::new());
        let (dialog, session) = new_session(factory.clone());
        let invite = TxData::new(Method::Invite, 1, "INVITE sip:bob@example.com SIP/2.0");
        session.store_message(MessageSlot::InviteRequest, invite.clone()).unwrap();

        session.add_ref().unwrap();
        assert_eq!(session.dec_ref().unwrap(), ReleaseStatus::Success);
        assert_eq!(factory.outstanding(), 2);
        assert_eq!(Arc::strong_count(&invite), 2);

        assert_eq!(session.dec_ref().unwrap(), ReleaseStatus::Gone);
        assert!(session.is_destroyed());
        assert_eq!(session.ref_count(), None);
        assert_eq!(factory.outstanding(), 0);
        assert_eq!(Arc::strong_count(&invite), 1);
        assert!(session.reliability().is_none());
        assert!(session.session_timer().is_none());
        assert!(dialog.is_terminated());
    }

    #[test]
    fn test_operations_after_gone_are_invalid() {
        let (_dialog, session) = new_session(Arc::new(CachingPoolFactory::new()));
        assert!(session.dec_ref().unwrap().is_gone());

        assert!(matches!(session.add_ref(), Err(LifecycleError::InvalidState(_))));
        assert!(matches!(session.dec_ref(), Err(LifecycleError::InvalidState(_))));
        assert!(session.swap_pools().is_err());
        assert!(session.acquire().is_err());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let (_dialog, session) = new_session(Arc::new(CachingPoolFactory::new()));
        {
            let guard = session.acquire().unwrap();
            assert_eq!(guard.ref_count(), Some(2));
        }
        assert_eq!(session.ref_count(), Some(1));
    }

    #[test]
    fn test_guard_release_reports_gone() {
        let (_dialog, session) = new_session(Arc::new(CachingPoolFactory::new()));
        let guard = session.acquire().unwrap();
        session.terminate(487).unwrap();
        assert_eq!(session.state(), InvState::Disconnected);
        assert!(!session.is_destroyed());

        assert_eq!(guard.release().unwrap(), ReleaseStatus::Gone);
        assert!(session.is_destroyed());
    }
}
