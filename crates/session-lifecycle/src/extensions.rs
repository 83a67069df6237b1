//! Session extensions
//!
//! Extensions subscribe to a session for part of its life and must be told
//! when it ends, before the session's pools are released. Two are provided:
//! reliable provisional responses (RFC 3262) and session timers (RFC 4028).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{Refresher, SessionConfig};
use crate::types::SessionId;

/// An attachable module that must be notified when its session ends
pub trait SessionExtension: Send + Sync {
    /// Extension name for logging
    fn name(&self) -> &'static str;

    /// End the extension's subscription to the session.
    ///
    /// Must be idempotent: calling it on an extension that is not attached
    /// does nothing.
    fn end_session(&self, session_id: &SessionId);
}

/// Reliable provisional responses (100rel / PRACK)
#[derive(Debug)]
pub struct ReliableProvisional {
    attached: AtomicBool,
    next_rseq: AtomicU32,
    /// RSeq values sent and not yet acknowledged by PRACK
    unacknowledged: Mutex<VecDeque<u32>>,
}

impl ReliableProvisional {
    pub fn new() -> Self {
        Self {
            attached: AtomicBool::new(true),
            next_rseq: AtomicU32::new(1),
            unacknowledged: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<u32>> {
        self.unacknowledged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a reliable provisional response and return its RSeq.
    /// Returns `None` once the session has ended.
    pub fn send_reliable(&self) -> Option<u32> {
        if !self.is_attached() {
            return None;
        }
        let rseq = self.next_rseq.fetch_add(1, Ordering::SeqCst);
        self.pending().push_back(rseq);
        Some(rseq)
    }

    /// Handle a PRACK. Returns true if `rseq` matched an outstanding response.
    pub fn on_prack(&self, rseq: u32) -> bool {
        let mut pending = self.pending();
        match pending.iter().position(|r| *r == rseq) {
            Some(idx) => {
                pending.remove(idx);
                true
            }
            None => {
                warn!("PRACK for unknown RSeq {}", rseq);
                false
            }
        }
    }

    /// Number of reliable provisionals still awaiting PRACK
    pub fn unacknowledged(&self) -> usize {
        self.pending().len()
    }
}

impl Default for ReliableProvisional {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionExtension for ReliableProvisional {
    fn name(&self) -> &'static str {
        "100rel"
    }

    fn end_session(&self, session_id: &SessionId) {
        if !self.attached.swap(false, Ordering::SeqCst) {
            return;
        }
        let dropped = {
            let mut pending = self.pending();
            let n = pending.len();
            pending.clear();
            n
        };
        debug!(
            "100rel ended for session {} ({} unacknowledged provisionals dropped)",
            session_id, dropped
        );
    }
}

/// Session refresh timer (RFC 4028)
#[derive(Debug)]
pub struct SessionTimer {
    attached: AtomicBool,
    session_expires: Duration,
    min_se: Duration,
    refresher: Refresher,
    refreshes: AtomicU64,
    last_refresh: Mutex<Instant>,
}

impl SessionTimer {
    pub fn new(session_expires: Duration, min_se: Duration, refresher: Refresher) -> Self {
        Self {
            attached: AtomicBool::new(true),
            session_expires,
            min_se,
            refresher,
            refreshes: AtomicU64::new(0),
            last_refresh: Mutex::new(Instant::now()),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.session_expires, config.min_se, config.refresher)
    }

    pub fn is_running(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn last_refresh(&self) -> MutexGuard<'_, Instant> {
        self.last_refresh
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn refresher(&self) -> Refresher {
        self.refresher
    }

    pub fn min_se(&self) -> Duration {
        self.min_se
    }

    /// Interval after which the refresher should send a refresh (half the
    /// session interval)
    pub fn refresh_interval(&self) -> Duration {
        self.session_expires / 2
    }

    /// Record a successful session refresh. Ignored once the session has ended.
    pub fn refresh(&self) {
        if !self.is_running() {
            return;
        }
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh() = Instant::now();
    }

    /// Number of refreshes recorded
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Whether the session interval has elapsed without a refresh
    pub fn is_expired(&self) -> bool {
        self.last_refresh().elapsed() >= self.session_expires
    }
}

impl SessionExtension for SessionTimer {
    fn name(&self) -> &'static str {
        "timer"
    }

    fn end_session(&self, session_id: &SessionId) {
        if self.attached.swap(false, Ordering::SeqCst) {
            info!(
                "Session timer stopped for session {} after {} refreshes",
                session_id,
                self.refresh_count()
            );
        }
    }
}
