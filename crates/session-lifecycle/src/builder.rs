//! Session Builder
//!
//! Builds INVITE sessions. Every fallible step (pool creation, dialog
//! registration) happens before the reference counter exists and is unwound
//! by hand on failure. Once the counter is created the builder takes the
//! creator's reference and hands the session out with a count of one.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::dialog::DialogAssociation;
use crate::errors::Result;
use crate::extensions::{ReliableProvisional, SessionExtension, SessionTimer};
use crate::pool::{CachingPoolFactory, FlipFlopPools, PoolFactory};
use crate::session::{InviteSession, SessionObserver, SessionParts};
use crate::types::{InvState, Role, SessionId};

/// Builder for INVITE sessions
pub struct SessionBuilder {
    config: SessionConfig,
    pool_factory: Arc<dyn PoolFactory>,
    reliability: Option<Arc<dyn SessionExtension>>,
    timer: Option<Arc<dyn SessionExtension>>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl SessionBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            pool_factory: Arc::new(CachingPoolFactory::new()),
            reliability: None,
            timer: None,
            observer: None,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the factory the session pools are drawn from and returned to
    pub fn with_pool_factory(mut self, factory: Arc<dyn PoolFactory>) -> Self {
        self.pool_factory = factory;
        self
    }

    pub fn enable_100rel(mut self, enabled: bool) -> Self {
        self.config.enable_100rel = enabled;
        self
    }

    pub fn enable_session_timer(mut self, enabled: bool) -> Self {
        self.config.enable_session_timer = enabled;
        self
    }

    /// Attach a custom reliability extension instead of [`ReliableProvisional`]
    pub fn with_reliability_extension(mut self, extension: Arc<dyn SessionExtension>) -> Self {
        self.reliability = Some(extension);
        self
    }

    /// Attach a custom session timer extension instead of [`SessionTimer`]
    pub fn with_timer_extension(mut self, extension: Arc<dyn SessionExtension>) -> Self {
        self.timer = Some(extension);
        self
    }

    /// Receive state change notifications for every session built
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a session for an outgoing INVITE
    pub fn create_uac(&self, dialog: Arc<dyn DialogAssociation>) -> Result<Arc<InviteSession>> {
        self.create(dialog, Role::Uac, InvState::Null)
    }

    /// Create a session for a received INVITE
    pub fn create_uas(&self, dialog: Arc<dyn DialogAssociation>) -> Result<Arc<InviteSession>> {
        self.create(dialog, Role::Uas, InvState::Incoming)
    }

    fn create(
        &self,
        dialog: Arc<dyn DialogAssociation>,
        role: Role,
        initial_state: InvState,
    ) -> Result<Arc<InviteSession>> {
        self.config.validate()?;

        let factory = self.pool_factory.as_ref();
        let active = factory.create_pool(&self.config.active_pool)?;
        let provisional = match factory.create_pool(&self.config.provisional_pool) {
            Ok(pool) => pool,
            Err(e) => {
                factory.release_pool(active);
                return Err(e);
            }
        };
        let pools = FlipFlopPools::new(active, provisional);

        let id = SessionId::new();
        if let Err(e) = dialog.inc_session(&id) {
            warn!("Failed to attach session {} to dialog {}: {}", id, dialog.id(), e);
            pools.release(factory);
            return Err(e);
        }

        let reliability = match (&self.reliability, self.config.enable_100rel) {
            (Some(ext), _) => Some(ext.clone()),
            (None, true) => Some(Arc::new(ReliableProvisional::new()) as Arc<dyn SessionExtension>),
            (None, false) => None,
        };
        let timer = match (&self.timer, self.config.enable_session_timer) {
            (Some(ext), _) => Some(ext.clone()),
            (None, true) => Some(Arc::new(SessionTimer::from_config(&self.config)) as Arc<dyn SessionExtension>),
            (None, false) => None,
        };

        let session = InviteSession::from_parts(SessionParts {
            id,
            role,
            initial_state,
            dialog,
            pools,
            pool_factory: self.pool_factory.clone(),
            reliability,
            timer,
            observer: self.observer.clone(),
            history_limit: self.config.history_limit,
        });

        // No failure past this point; the counter starts at zero and the
        // creator's reference is taken before anyone else sees the session.
        session.activate()?;

        info!(
            "Created {} session {} in dialog {}",
            role,
            session.id(),
            session.dialog_id()
        );
        Ok(session)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
