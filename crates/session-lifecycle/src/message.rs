//! Outbound message handles held by an INVITE session

use std::fmt;
use std::sync::Arc;

/// SIP method of an outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Invite => write!(f, "INVITE"),
            Method::Ack => write!(f, "ACK"),
            Method::Bye => write!(f, "BYE"),
        }
    }
}

/// Callback run when the last handle to a [`TxData`] is dropped
pub type ReleaseHook = Box<dyn Fn(&TxData) + Send + Sync>;

/// An encoded outbound request
///
/// Shared between the session and the transaction layer through `Arc`; the
/// session drops its handle during teardown. An optional release hook lets the
/// owner of the buffer learn when it is freed.
pub struct TxData {
    method: Method,
    cseq: u32,
    payload: Vec<u8>,
    on_release: Option<ReleaseHook>,
}

impl TxData {
    pub fn new(method: Method, cseq: u32, payload: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            method,
            cseq,
            payload: payload.into(),
            on_release: None,
        })
    }

    /// Create a message that runs `hook` once its last handle is dropped
    pub fn with_release_hook(
        method: Method,
        cseq: u32,
        payload: impl Into<Vec<u8>>,
        hook: impl Fn(&TxData) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            method,
            cseq,
            payload: payload.into(),
            on_release: Some(Box::new(hook)),
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl fmt::Debug for TxData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxData")
            .field("method", &self.method)
            .field("cseq", &self.cseq)
            .field("payload_len", &self.payload.len())
            .field("has_release_hook", &self.on_release.is_some())
            .finish()
    }
}

impl Drop for TxData {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook(self);
        }
    }
}

impl fmt::Display for TxData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (CSeq {}, {} bytes)", self.method, self.cseq, self.payload.len())
    }
}

/// Which outbound message slot of a session a handle is stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSlot {
    /// Last ACK sent, kept for retransmission on 2xx retransmits
    LastAck,
    /// The original INVITE request
    InviteRequest,
    /// BYE waiting for the INVITE transaction to complete
    PendingBye,
}

impl MessageSlot {
    /// Method a message must carry to be stored in this slot
    pub fn expected_method(&self) -> Method {
        match self {
            MessageSlot::LastAck => Method::Ack,
            MessageSlot::InviteRequest => Method::Invite,
            MessageSlot::PendingBye => Method::Bye,
        }
    }
}
