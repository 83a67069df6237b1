//! Per-session state transition history

use std::collections::VecDeque;
use std::time::Instant;

use crate::types::InvState;

/// Record of a single state transition
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    /// Monotonic sequence number
    pub sequence: u64,
    pub from_state: InvState,
    pub to_state: InvState,
    /// Status code carried by the transition, if any
    pub cause: Option<u16>,
    pub timestamp: Instant,
}

/// Ring buffer of the most recent transitions
#[derive(Debug, Clone)]
pub struct SessionHistory {
    transitions: VecDeque<TransitionRecord>,
    limit: usize,
    next_sequence: u64,
}

impl SessionHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            transitions: VecDeque::with_capacity(limit.min(16)),
            limit,
            next_sequence: 0,
        }
    }

    pub fn record(&mut self, from_state: InvState, to_state: InvState, cause: Option<u16>) {
        if self.transitions.len() >= self.limit {
            self.transitions.pop_front();
        }
        self.transitions.push_back(TransitionRecord {
            sequence: self.next_sequence,
            from_state,
            to_state,
            cause,
            timestamp: Instant::now(),
        });
        self.next_sequence += 1;
    }

    /// Retained transitions, oldest first
    pub fn transitions(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.transitions.iter()
    }

    /// Total transitions recorded, including evicted ones
    pub fn total(&self) -> u64 {
        self.next_sequence
    }
}
