//! Notifications dispatched to collaborators.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use serde::Serialize;

use crate::dom::NodeId;

/// Outcome notifications emitted by the consent core
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsentEvent {
    /// A deferred script finished: loaded, failed, or timed out
    ScriptLoaded {
        node: NodeId,
        source: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A content pass finished
    RestrictionsUpdated { restricted: usize, allowed: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventListenerId(u64);

type EventListener = Rc<dyn Fn(&ConsentEvent)>;

/// Events kept for inspection; older ones are dropped first
pub const HISTORY_LIMIT: usize = 256;

/// Fan-out of [`ConsentEvent`]s, keeping the most recent ones for
/// inspection.
#[derive(Default)]
pub struct EventBus {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(EventListenerId, EventListener)>>,
    history: RefCell<VecDeque<ConsentEvent>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&ConsentEvent) + 'static) -> EventListenerId {
        let id = EventListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: EventListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Record `event` and deliver it to every listener
    pub fn emit(&self, event: ConsentEvent) {
        {
            let mut history = self.history.borrow_mut();
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        let listeners: Vec<EventListener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    /// The most recent events, oldest first
    pub fn history(&self) -> Vec<ConsentEvent> {
        self.history.borrow().iter().cloned().collect()
    }

    /// Remove and return the retained events, oldest first
    pub fn take_history(&self) -> Vec<ConsentEvent> {
        self.history.borrow_mut().drain(..).collect()
    }
}
