//! Sink Registry
//!
//! Thread-safe binding of session ids to their active event consumer.
//! The lock is scoped to the map update only; delivery happens on cloned
//! senders after the lock is dropped, so consumer work never runs under it.

use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;

use super::events::SessionEvent;
use super::SessionId;

/// The bound consumer of one session's event stream.
pub type EventSink = mpsc::UnboundedSender<SessionEvent>;

/// Session-id to sink map. At most one sink is bound per id at any instant.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: Mutex<HashMap<SessionId, EventSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind or atomically replace the sink for `id`, returning the
    /// superseded sink if there was one.
    pub fn register(&self, id: SessionId, sink: EventSink) -> Option<EventSink> {
        let replaced = self.sinks.lock().insert(id, sink);
        if replaced.is_some() {
            debug!("Superseded existing sink for session {}", id);
        }
        replaced
    }

    /// Remove the binding for `id`. A missing binding is not an error.
    pub fn unregister(&self, id: SessionId) -> bool {
        self.sinks.lock().remove(&id).is_some()
    }

    /// Clone of the currently bound sink, or `None`.
    pub fn lookup(&self, id: SessionId) -> Option<EventSink> {
        self.sinks.lock().get(&id).cloned()
    }

    /// Whether a sink is currently bound for `id`
    pub fn is_bound(&self, id: SessionId) -> bool {
        self.sinks.lock().contains_key(&id)
    }

    /// Number of currently bound sinks
    pub fn bound_count(&self) -> usize {
        self.sinks.lock().len()
    }
}
