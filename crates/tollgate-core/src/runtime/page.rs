//! The browsing context: document, timers, listeners, observers and the
//! global consent handles.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::warn;

use crate::dom::{Document, MutationRecord, NodeId, PageFixture};
use crate::events::EventBus;
use crate::reconciler::ContentReconciler;
use crate::store::ConsentStore;

use super::dialogs::{ScriptedDialogs, UserDialogs};
use super::scheduler::{Scheduler, TaskHandle};

/// Observer callbacks re-run while they keep inserting nodes; past this many
/// rounds the remaining records are dropped.
const MAX_MUTATION_ROUNDS: usize = 32;

/// DOM events the core listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    Load,
    Error,
}

impl EventKind {
    const fn bubbles(self) -> bool {
        matches!(self, Self::Click)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Capture,
    Bubble,
}

/// Where a listener is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Document,
    Node(NodeId),
}

/// An event travelling through the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomEvent {
    pub kind: EventKind,
    pub target: NodeId,
    pub current_target: EventTarget,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl DomEvent {
    const fn new(kind: EventKind, target: NodeId) -> Self {
        Self {
            kind,
            target,
            current_target: EventTarget::Node(target),
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub const fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    pub const fn propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

/// What a click ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickOutcome {
    pub default_prevented: bool,
    /// Target of the followed link, if the default action navigated
    pub navigate_to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub type Listener = Rc<dyn Fn(&Page, &mut DomEvent)>;
pub type MutationCallback = Rc<dyn Fn(&Page, &[MutationRecord])>;

struct ListenerEntry {
    id: ListenerId,
    target: EventTarget,
    kind: EventKind,
    phase: Phase,
    listener: Listener,
}

/// A network request started for a deferred resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFetch {
    pub node: NodeId,
    pub source: String,
}

/// How the network answered a [`PendingFetch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Loaded,
    Failed,
}

struct PageInner {
    url: String,
    document: RefCell<Document>,
    scheduler: Scheduler,
    events: EventBus,
    dialogs: Rc<dyn UserDialogs>,
    next_id: Cell<u64>,
    listeners: RefCell<Vec<ListenerEntry>>,
    observers: RefCell<Vec<(ObserverId, MutationCallback)>>,
    fetches: RefCell<Vec<PendingFetch>>,
    consent: RefCell<Option<ConsentStore>>,
    restrictions: RefCell<Option<ContentReconciler>>,
}

/// Cheap-clone handle to a page.
///
/// Components keep a [`WeakPage`] so that dropping the last `Page` tears the
/// whole context down.
#[derive(Clone)]
pub struct Page {
    inner: Rc<PageInner>,
}

/// Non-owning page handle
#[derive(Clone, Default)]
pub struct WeakPage {
    inner: Weak<PageInner>,
}

impl WeakPage {
    pub fn upgrade(&self) -> Option<Page> {
        self.inner.upgrade().map(|inner| Page { inner })
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Page")
            .field("url", &self.inner.url)
            .field("now", &self.inner.scheduler.now())
            .finish_non_exhaustive()
    }
}

impl Page {
    pub fn new(url: impl Into<String>, document: Document, dialogs: Rc<dyn UserDialogs>) -> Self {
        Self {
            inner: Rc::new(PageInner {
                url: url.into(),
                document: RefCell::new(document),
                scheduler: Scheduler::new(),
                events: EventBus::new(),
                dialogs,
                next_id: Cell::new(0),
                listeners: RefCell::new(Vec::new()),
                observers: RefCell::new(Vec::new()),
                fetches: RefCell::new(Vec::new()),
                consent: RefCell::new(None),
                restrictions: RefCell::new(None),
            }),
        }
    }

    /// Empty document at `url` with dialogs that decline every question
    pub fn blank(url: impl Into<String>) -> Self {
        Self::new(url, Document::new(), Rc::new(ScriptedDialogs::default()))
    }

    pub fn from_fixture(fixture: &PageFixture, dialogs: Rc<dyn UserDialogs>) -> Self {
        Self::new(fixture.url.clone(), fixture.build_document(), dialogs)
    }

    pub fn downgrade(&self) -> WeakPage {
        WeakPage {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Served over https; decides the cookie `Secure` flag
    pub fn is_secure(&self) -> bool {
        self.inner
            .url
            .trim()
            .to_ascii_lowercase()
            .starts_with("https://")
    }

    /// Borrow the document. Do not hold the borrow across calls back into
    /// the page.
    pub fn document(&self) -> Ref<'_, Document> {
        self.inner.document.borrow()
    }

    pub fn document_mut(&self) -> RefMut<'_, Document> {
        self.inner.document.borrow_mut()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn dialogs(&self) -> Rc<dyn UserDialogs> {
        self.inner.dialogs.clone()
    }

    pub fn now(&self) -> Duration {
        self.inner.scheduler.now()
    }

    fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    // ----- global namespaces ----------------------------------------------

    /// Publish the consent store for collaborators
    pub fn install_consent(&self, store: ConsentStore) {
        *self.inner.consent.borrow_mut() = Some(store);
    }

    pub fn consent(&self) -> Option<ConsentStore> {
        self.inner.consent.borrow().clone()
    }

    /// Publish the content reconciler for collaborators
    pub fn install_restrictions(&self, reconciler: ContentReconciler) {
        *self.inner.restrictions.borrow_mut() = Some(reconciler);
    }

    pub fn restrictions(&self) -> Option<ContentReconciler> {
        self.inner.restrictions.borrow().clone()
    }

    // ----- timers ---------------------------------------------------------

    /// Run `task` after `delay`; skipped if the page is gone by then
    pub fn set_timeout(&self, delay: Duration, task: impl FnOnce(&Self) + 'static) -> TaskHandle {
        let page = self.downgrade();
        self.inner.scheduler.schedule(delay, move || {
            if let Some(page) = page.upgrade() {
                task(&page);
            }
        })
    }

    /// Number of timers still waiting
    pub fn pending_timers(&self) -> usize {
        self.inner.scheduler.pending()
    }

    /// Due time of the next timer
    pub fn next_timer_due(&self) -> Option<Duration> {
        self.inner.scheduler.next_due()
    }

    /// Let `duration` pass, running due timers in order and delivering
    /// mutation records after each one.
    pub fn advance(&self, duration: Duration) {
        self.flush_mutations();
        let until = self.now() + duration;
        while let Some(task) = self.inner.scheduler.pop_due(until) {
            task();
            self.flush_mutations();
        }
        self.inner.scheduler.advance_clock_to(until);
    }

    // ----- mutation observers ---------------------------------------------

    pub fn observe(&self, callback: impl Fn(&Self, &[MutationRecord]) + 'static) -> ObserverId {
        let id = ObserverId(self.next_id());
        self.inner
            .observers
            .borrow_mut()
            .push((id, Rc::new(callback)));
        id
    }

    pub fn disconnect(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Deliver pending mutation records to every observer
    pub fn flush_mutations(&self) {
        for _ in 0..MAX_MUTATION_ROUNDS {
            let records = self.document_mut().take_mutations();
            if records.is_empty() {
                return;
            }
            let observers: Vec<MutationCallback> = self
                .inner
                .observers
                .borrow()
                .iter()
                .map(|(_, callback)| callback.clone())
                .collect();
            for observer in observers {
                observer(self, &records);
            }
        }
        let dropped = self.document_mut().take_mutations().len();
        warn!(dropped, "mutation observers kept inserting nodes, dropping records");
    }

    // ----- events ---------------------------------------------------------

    pub fn add_listener(
        &self,
        target: EventTarget,
        kind: EventKind,
        phase: Phase,
        listener: impl Fn(&Self, &mut DomEvent) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id());
        self.inner.listeners.borrow_mut().push(ListenerEntry {
            id,
            target,
            kind,
            phase,
            listener: Rc::new(listener),
        });
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    fn listeners_for(
        &self,
        target: EventTarget,
        kind: EventKind,
        phase: Option<Phase>,
    ) -> Vec<Listener> {
        self.inner
            .listeners
            .borrow()
            .iter()
            .filter(|entry| {
                entry.target == target
                    && entry.kind == kind
                    && phase.is_none_or(|phase| entry.phase == phase)
            })
            .map(|entry| entry.listener.clone())
            .collect()
    }

    /// Dispatch an event: capture from the document down, the target itself,
    /// then bubbling back up for events that bubble.
    pub fn dispatch(&self, target: NodeId, kind: EventKind) -> DomEvent {
        let path = self.document().ancestors_inclusive(target);

        let mut stages = vec![(EventTarget::Document, Some(Phase::Capture))];
        stages.extend(
            path.iter()
                .skip(1)
                .rev()
                .map(|node| (EventTarget::Node(*node), Some(Phase::Capture))),
        );
        stages.push((EventTarget::Node(target), None));
        if kind.bubbles() {
            stages.extend(
                path.iter()
                    .skip(1)
                    .map(|node| (EventTarget::Node(*node), Some(Phase::Bubble))),
            );
            stages.push((EventTarget::Document, Some(Phase::Bubble)));
        }

        let mut event = DomEvent::new(kind, target);
        for (current, phase) in stages {
            for listener in self.listeners_for(current, kind, phase) {
                event.current_target = current;
                listener(self, &mut event);
            }
            if event.propagation_stopped {
                break;
            }
        }
        self.flush_mutations();
        event
    }

    /// Click `target` and perform the default action (link navigation)
    /// unless a listener prevented it.
    pub fn click(&self, target: NodeId) -> ClickOutcome {
        let event = self.dispatch(target, EventKind::Click);
        let navigate_to = if event.default_prevented {
            None
        } else {
            let document = self.document();
            document
                .closest(target, |doc, node| {
                    doc.tag(node) == "a" && doc.has_attribute(node, "href")
                })
                .and_then(|anchor| document.attribute(anchor, "href"))
                .map(ToString::to_string)
        };
        ClickOutcome {
            default_prevented: event.default_prevented,
            navigate_to,
        }
    }

    // ----- network --------------------------------------------------------

    /// Start fetching `source` for `node`
    pub fn request_fetch(&self, node: NodeId, source: impl Into<String>) {
        self.inner.fetches.borrow_mut().push(PendingFetch {
            node,
            source: source.into(),
        });
    }

    pub fn pending_fetches(&self) -> Vec<PendingFetch> {
        self.inner.fetches.borrow().clone()
    }

    /// Answer a pending fetch, firing `load` or `error` on its node.
    ///
    /// Returns false when no fetch was pending for `node`.
    pub fn complete_fetch(&self, node: NodeId, outcome: FetchOutcome) -> bool {
        let was_pending = {
            let mut fetches = self.inner.fetches.borrow_mut();
            let before = fetches.len();
            fetches.retain(|fetch| fetch.node != node);
            fetches.len() != before
        };
        if was_pending {
            let kind = match outcome {
                FetchOutcome::Loaded => EventKind::Load,
                FetchOutcome::Failed => EventKind::Error,
            };
            self.dispatch(node, kind);
        }
        was_pending
    }
}
