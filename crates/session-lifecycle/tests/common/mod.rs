//! Shared test collaborators that record what teardown does to them

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rvoip_session_lifecycle::{
    CachingPoolFactory, DialogAssociation, DialogId, InvState, InviteSession, MemoryPool,
    PoolConfig, PoolFactory, Result, SessionBuilder, SessionExtension, SessionId, SessionObserver,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Ordered log of collaborator calls
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

pub struct RecordingDialog {
    id: DialogId,
    log: EventLog,
}

impl RecordingDialog {
    pub fn new(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            id: DialogId::new(),
            log,
        })
    }
}

impl DialogAssociation for RecordingDialog {
    fn id(&self) -> DialogId {
        self.id
    }

    fn inc_session(&self, _session_id: &SessionId) -> Result<()> {
        self.log.push("dialog:inc");
        Ok(())
    }

    fn dec_session(&self, _session_id: &SessionId) {
        self.log.push("dialog:dec");
    }
}

pub struct RecordingExtension {
    name: &'static str,
    log: EventLog,
}

impl RecordingExtension {
    pub fn new(name: &'static str, log: EventLog) -> Arc<Self> {
        Arc::new(Self { name, log })
    }
}

impl SessionExtension for RecordingExtension {
    fn name(&self) -> &'static str {
        self.name
    }

    fn end_session(&self, _session_id: &SessionId) {
        self.log.push(format!("{}:end", self.name));
    }
}

pub struct RecordingPoolFactory {
    inner: CachingPoolFactory,
    log: EventLog,
}

impl RecordingPoolFactory {
    pub fn new(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            inner: CachingPoolFactory::new(),
            log,
        })
    }

    pub fn outstanding(&self) -> usize {
        self.inner.outstanding()
    }
}

impl PoolFactory for RecordingPoolFactory {
    fn create_pool(&self, config: &PoolConfig) -> Result<MemoryPool> {
        self.inner.create_pool(config)
    }

    fn release_pool(&self, pool: MemoryPool) {
        self.log.push(format!("pool:{}", pool.name()));
        self.inner.release_pool(pool);
    }
}

/// Counts terminal-state notifications
#[derive(Default)]
pub struct TerminalCounter {
    pub disconnects: AtomicUsize,
}

impl TerminalCounter {
    pub fn count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl SessionObserver for TerminalCounter {
    fn on_state_changed(&self, _session: &Arc<InviteSession>, _old: InvState, new_state: InvState) {
        if new_state.is_terminal() {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Fully instrumented session: recording dialog, both extensions, pools
pub struct Harness {
    pub log: EventLog,
    pub factory: Arc<RecordingPoolFactory>,
    pub session: Arc<InviteSession>,
}

pub fn instrumented_session() -> Harness {
    let log = EventLog::default();
    let factory = RecordingPoolFactory::new(log.clone());
    let session = SessionBuilder::new()
        .with_pool_factory(factory.clone())
        .with_reliability_extension(RecordingExtension::new("100rel", log.clone()))
        .with_timer_extension(RecordingExtension::new("timer", log.clone()))
        .create_uac(RecordingDialog::new(log.clone()))
        .unwrap();
    Harness {
        log,
        factory,
        session,
    }
}
