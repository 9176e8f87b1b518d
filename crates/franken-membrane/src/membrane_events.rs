//! Structured membrane event ledger.
//!
//! Every wrapper creation, disclosure, patch and policy denial appends one
//! [`MembraneEvent`].  Sequence numbers are strictly increasing per
//! membrane and never reused, even after old events are evicted.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

pub const EVENT_WRAPPER_CREATED: &str = "wrapper_created";
pub const EVENT_WRAPPER_RECREATED: &str = "wrapper_recreated";
pub const EVENT_KEY_DISCLOSED: &str = "key_disclosed";
pub const EVENT_DISCLOSURE_PATCHED: &str = "disclosure_patched";
pub const EVENT_POLICY_DENIED: &str = "policy_denied";
pub const EVENT_INVARIANT_VIOLATION: &str = "invariant_violation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembraneEvent {
    pub seq: u64,
    pub component: String,
    pub event: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub detail: String,
}

/// Bounded, append-only event buffer.  When full the oldest event is
/// dropped.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<MembraneEvent>,
    next_seq: u64,
    capacity: usize,
    enabled: bool,
    dropped: u64,
}

impl EventLog {
    pub fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_seq: 0,
            capacity,
            enabled,
            dropped: 0,
        }
    }

    pub fn push(
        &mut self,
        component: &str,
        event: &str,
        outcome: &str,
        error_code: Option<String>,
        detail: impl Into<String>,
    ) {
        if !self.enabled || self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped = self.dropped.saturating_add(1);
        }
        self.events.push_back(MembraneEvent {
            seq: self.next_seq,
            component: component.to_string(),
            event: event.to_string(),
            outcome: outcome.to_string(),
            error_code,
            detail: detail.into(),
        });
        self.next_seq = self.next_seq.saturating_add(1);
    }

    pub fn events(&self) -> Vec<MembraneEvent> {
        self.events.iter().cloned().collect()
    }

    /// Drain the buffer.  Sequence numbering continues afterwards.
    pub fn take(&mut self) -> Vec<MembraneEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.iter().filter(|e| e.event == event).count()
    }
}
