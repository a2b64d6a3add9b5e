//! Structured, deterministic event log for registration and tracking.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

pub const TRACKING_COMPONENT: &str = "model_library";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingContext {
    pub trace_id: String,
}

impl TrackingContext {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub seq: u64,
    pub trace_id: String,
    pub component: String,
    pub event: String,
    pub outcome: String,
    pub error_code: String,
    pub type_name: String,
    pub detail: String,
}

/// Bounded event log; `seq` keeps increasing when old events are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    events: VecDeque<TrackingEvent>,
    next_seq: u64,
    capacity: usize,
    enabled: bool,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(4096, true)
    }
}

impl EventLog {
    pub fn new(capacity: usize, enabled: bool) -> Self {
        Self {
            events: VecDeque::new(),
            next_seq: 0,
            capacity,
            enabled,
        }
    }

    pub fn push(
        &mut self,
        context: &TrackingContext,
        event: impl Into<String>,
        outcome: impl Into<String>,
        error_code: impl Into<String>,
        type_name: impl Into<String>,
        detail: impl Into<String>,
    ) {
        if !self.enabled || self.capacity == 0 {
            return;
        }
        let event = TrackingEvent {
            seq: self.next_seq,
            trace_id: context.trace_id.clone(),
            component: TRACKING_COMPONENT.to_string(),
            event: event.into(),
            outcome: outcome.into(),
            error_code: error_code.into(),
            type_name: type_name.into(),
            detail: detail.into(),
        };
        self.next_seq = self.next_seq.saturating_add(1);
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn events(&self) -> Vec<TrackingEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&TrackingEvent> {
        self.events.back()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
