//! Concurrent index of live INVITE sessions
//!
//! The registry stores session handles, so it holds a reference for each
//! entry: acquired on insert, released on removal. Lookups hand out a
//! [`SessionRef`] acquired while the registry's own reference keeps the
//! session alive.
//!
//! Registered as a [`SessionObserver`], the registry drops its entry when a
//! session disconnects.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::{LifecycleError, Result};
use crate::session::{InviteSession, ReleaseStatus, SessionObserver, SessionRef};
use crate::types::{DialogId, InvState, SessionId};

/// Registry statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub live: usize,
    pub inserted: u64,
    pub removed: u64,
    /// Removals whose release tore the session down
    pub destroyed_on_remove: u64,
}

/// Lock-free map of sessions keyed by session ID
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<InviteSession>>,
    by_dialog: DashMap<DialogId, Vec<SessionId>>,
    inserted: AtomicU64,
    removed: AtomicU64,
    destroyed_on_remove: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            by_dialog: DashMap::new(),
            inserted: AtomicU64::new(0),
            removed: AtomicU64::new(0),
            destroyed_on_remove: AtomicU64::new(0),
        }
    }

    /// Store a session, acquiring a reference for the registry.
    ///
    /// The caller must itself hold a reference. Inserting a session that is
    /// already present does nothing. A disconnected session is rejected with
    /// `InvalidState`: its terminal notification has passed, so nothing would
    /// ever remove the entry.
    pub fn insert(&self, session: &Arc<InviteSession>) -> Result<()> {
        if session.state().is_terminal() {
            warn!("Refusing to register disconnected session {}", session.id());
            return Err(LifecycleError::InvalidState(session.id().clone()));
        }

        match self.sessions.entry(session.id().clone()) {
            Entry::Occupied(_) => {
                debug!("Session {} already registered", session.id());
                return Ok(());
            }
            Entry::Vacant(entry) => {
                session.add_ref()?;
                entry.insert(session.clone());
            }
        }

        self.by_dialog
            .entry(session.dialog_id())
            .or_default()
            .push(session.id().clone());
        self.inserted.fetch_add(1, Ordering::Relaxed);
        debug!("Registered session {}", session.id());

        // Disconnected while we were inserting; the observer may have missed
        // the entry.
        if session.state().is_terminal() {
            self.remove(session.id())?;
            return Err(LifecycleError::InvalidState(session.id().clone()));
        }
        Ok(())
    }

    /// Acquire a reference to a registered session
    pub fn get(&self, session_id: &SessionId) -> Option<SessionRef> {
        // The shard guard keeps the registry's reference in place while we
        // acquire ours.
        let entry = self.sessions.get(session_id)?;
        match entry.value().acquire() {
            Ok(session_ref) => Some(session_ref),
            Err(e) => {
                warn!("Registered session {} is not acquirable: {}", session_id, e);
                None
            }
        }
    }

    /// Sessions registered for a dialog
    pub fn find_by_dialog(&self, dialog_id: &DialogId) -> Vec<SessionId> {
        self.by_dialog
            .get(dialog_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }

    /// Remove a session and release the registry's reference.
    ///
    /// Returns `Ok(None)` if the session was not registered.
    pub fn remove(&self, session_id: &SessionId) -> Result<Option<ReleaseStatus>> {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return Ok(None);
        };

        let dialog_id = session.dialog_id();
        if let Some(mut ids) = self.by_dialog.get_mut(&dialog_id) {
            ids.retain(|id| id != session_id);
        }
        self.by_dialog.remove_if(&dialog_id, |_, ids| ids.is_empty());

        self.removed.fetch_add(1, Ordering::Relaxed);
        let status = session.dec_ref()?;
        if status.is_gone() {
            self.destroyed_on_remove.fetch_add(1, Ordering::Relaxed);
        }
        debug!("Unregistered session {} ({:?})", session_id, status);
        Ok(Some(status))
    }

    /// Remove every session, returning how many were torn down by the removal
    pub fn clear(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut gone = 0;
        for id in ids {
            match self.remove(&id) {
                Ok(Some(ReleaseStatus::Gone)) => gone += 1,
                Ok(_) => {}
                Err(e) => warn!("Failed to release session {}: {}", id, e),
            }
        }
        info!("Cleared session registry ({} sessions destroyed)", gone);
        gone
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live: self.sessions.len(),
            inserted: self.inserted.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            destroyed_on_remove: self.destroyed_on_remove.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionObserver for SessionRegistry {
    fn on_state_changed(&self, session: &Arc<InviteSession>, _old_state: InvState, new_state: InvState) {
        if !new_state.is_terminal() {
            return;
        }
        // The state machine still holds its reference, so this never tears
        // the session down.
        if let Err(e) = self.remove(session.id()) {
            warn!("Failed to unregister disconnected session {}: {}", session.id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SessionBuilder;
    use crate::dialog::Dialog;

    #[test]
    fn test_insert_holds_reference() {
        let registry = SessionRegistry::new();
        let session = SessionBuilder::new()
            .create_uac(Arc::new(Dialog::new("reg@test")))
            .unwrap();

        registry.insert(&session).unwrap();
        registry.insert(&session).unwrap();
        assert_eq!(session.ref_count(), Some(2));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find_by_dialog(&session.dialog_id()), vec![session.id().clone()]);

        {
            let found = registry.get(session.id()).unwrap();
            assert_eq!(found.ref_count(), Some(3));
        }

        assert_eq!(registry.remove(session.id()).unwrap(), Some(ReleaseStatus::Success));
        assert_eq!(session.ref_count(), Some(1));
        assert!(registry.find_by_dialog(&session.dialog_id()).is_empty());
        assert_eq!(registry.remove(session.id()).unwrap(), None);
    }

    #[test]
    fn test_registry_release_can_be_last() {
        let registry = SessionRegistry::new();
        let session = SessionBuilder::new()
            .create_uas(Arc::new(Dialog::new("last@test")))
            .unwrap();
        registry.insert(&session).unwrap();

        // State machine gives up its hold; the registry now owns the session
        let guard = registry.get(session.id()).unwrap();
        assert_eq!(session.dec_ref().unwrap(), ReleaseStatus::Success);
        drop(guard);

        assert_eq!(registry.clear(), 1);
        assert!(session.is_destroyed());
        let stats = registry.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.destroyed_on_remove, 1);
    }

    #[test]
    fn test_observer_unregisters_on_disconnect() {
        let registry = Arc::new(SessionRegistry::new());
        let session = SessionBuilder::new()
            .with_observer(registry.clone())
            .create_uac(Arc::new(Dialog::new("obs@test")))
            .unwrap();
        registry.insert(&session).unwrap();

        session.set_state(InvState::Calling, None).unwrap();
        assert!(registry.contains(session.id()));

        assert_eq!(session.terminate(603).unwrap(), Some(ReleaseStatus::Gone));
        assert!(!registry.contains(session.id()));
        assert!(session.is_destroyed());
    }

    #[test]
    fn test_disconnected_session_is_not_registered() {
        let registry = SessionRegistry::new();
        let session = SessionBuilder::new()
            .create_uac(Arc::new(Dialog::new("late-insert@test")))
            .unwrap();
        let app = session.acquire().unwrap();
        assert_eq!(session.terminate(200).unwrap(), Some(ReleaseStatus::Success));

        let err = registry.insert(&session).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState(_)));
        assert!(registry.is_empty());
        assert_eq!(session.ref_count(), Some(1));

        // The application's release is the last one
        assert_eq!(app.release().unwrap(), ReleaseStatus::Gone);
        assert!(session.is_destroyed());
    }
}
