//! Content reconciler.
//!
//! Keeps gated content (`data-consent-required`) in line with the consent
//! store: restriction classes and overlays for generic elements, disabled
//! fields for forms, neutralised links and withheld embeds. Passes run on
//! start-up, on every consent change and, debounced, whenever gated
//! content is inserted.

mod affordance;
mod passes;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::config::ConsentConfig;
use crate::dom::{MutationRecord, NodeId};
use crate::models::{ReconcileSummary, RestrictionType};
use crate::runtime::{
    EventKind, EventTarget, ListenerId, ObserverId, Page, Phase, TaskHandle, WeakPage,
};
use crate::store::{ConsentStore, Subscription};

pub const REQUIRED_ATTR: &str = "data-consent-required";
pub const RESTRICTION_TYPE_ATTR: &str = "data-restriction-type";
pub const STATUS_ATTR: &str = "data-consent-status";
pub const REASON_ATTR: &str = "data-consent-reason";
pub const FIELD_MARKER_ATTR: &str = "data-consent-disabled";
pub const ORIGINAL_HREF_ATTR: &str = "data-original-href";
pub const ORIGINAL_SRC_ATTR: &str = "data-original-src";

pub const OVERLAY_CLASS: &str = "consent-overlay-message";
pub const FORM_NOTICE_CLASS: &str = "consent-form-notice";
pub const EMBED_PLACEHOLDER_CLASS: &str = "consent-embed-placeholder";

/// Where the reconciler finds the consent store.
pub trait ConsentSource {
    fn resolve(&self) -> Option<ConsentStore>;
}

impl ConsentSource for ConsentStore {
    fn resolve(&self) -> Option<ConsentStore> {
        Some(self.clone())
    }
}

/// Look the store up in the page's global namespace
impl ConsentSource for WeakPage {
    fn resolve(&self) -> Option<ConsentStore> {
        self.upgrade()?.consent()
    }
}

/// Whether passes can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Not started, or still polling for the store
    Waiting,
    Connected,
    /// The store never showed up; passes are no-ops
    Unavailable,
    Disposed,
}

struct ReconcilerInner {
    page: WeakPage,
    config: ConsentConfig,
    source: Box<dyn ConsentSource>,
    availability: Cell<Availability>,
    store: RefCell<Option<ConsentStore>>,
    subscription: RefCell<Option<Subscription>>,
    click_guard: Cell<Option<ListenerId>>,
    observer: Cell<Option<ObserverId>>,
    initial_pass: RefCell<Option<TaskHandle>>,
    debounce: RefCell<Option<TaskHandle>>,
    poll: RefCell<Option<TaskHandle>>,
    poll_attempts: Cell<u32>,
    passes: Cell<usize>,
    /// Fields this reconciler disabled
    disabled_fields: RefCell<HashSet<NodeId>>,
    /// Click interceptors on restricted links
    link_guards: RefCell<HashMap<NodeId, ListenerId>>,
    /// Settings buttons inside overlays, notices and placeholders
    affordances: RefCell<HashMap<NodeId, ListenerId>>,
}

/// Cheap-clone handle to the reconciler of one page.
#[derive(Clone)]
pub struct ContentReconciler {
    inner: Rc<ReconcilerInner>,
}

impl fmt::Debug for ContentReconciler {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ContentReconciler")
            .field("availability", &self.inner.availability.get())
            .field("passes", &self.inner.passes.get())
            .finish_non_exhaustive()
    }
}

impl ContentReconciler {
    pub fn new(page: &Page, config: &ConsentConfig, source: impl ConsentSource + 'static) -> Self {
        Self {
            inner: Rc::new(ReconcilerInner {
                page: page.downgrade(),
                config: config.clone(),
                source: Box::new(source),
                availability: Cell::new(Availability::Waiting),
                store: RefCell::new(None),
                subscription: RefCell::new(None),
                click_guard: Cell::new(None),
                observer: Cell::new(None),
                initial_pass: RefCell::new(None),
                debounce: RefCell::new(None),
                poll: RefCell::new(None),
                poll_attempts: Cell::new(0),
                passes: Cell::new(0),
                disabled_fields: RefCell::new(HashSet::new()),
                link_guards: RefCell::new(HashMap::new()),
                affordances: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Create a reconciler that finds the store through the page, publish it
    /// and start it.
    pub fn install(page: &Page, config: &ConsentConfig) -> Self {
        let reconciler = Self::new(page, config, page.downgrade());
        page.install_restrictions(reconciler.clone());
        reconciler.start();
        reconciler
    }

    fn downgrade(&self) -> Weak<ReconcilerInner> {
        Rc::downgrade(&self.inner)
    }

    fn from_weak(weak: &Weak<ReconcilerInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn page(&self) -> Option<Page> {
        self.inner.page.upgrade()
    }

    fn store(&self) -> Option<ConsentStore> {
        self.inner.store.borrow().clone()
    }

    pub(crate) fn config(&self) -> &ConsentConfig {
        &self.inner.config
    }

    pub fn availability(&self) -> Availability {
        self.inner.availability.get()
    }

    /// Completed full passes
    pub fn pass_count(&self) -> usize {
        self.inner.passes.get()
    }

    /// Install the click guard and the insertion observer, then connect to
    /// the store or start polling for it. Calling it again does nothing.
    pub fn start(&self) {
        let Some(page) = self.page() else {
            return;
        };
        if self.inner.click_guard.get().is_some() || self.availability() != Availability::Waiting {
            return;
        }
        self.install_click_guard(&page);
        self.install_observer(&page);

        if let Some(store) = self.inner.source.resolve() {
            self.connect(store);
            let weak = self.downgrade();
            let task = page.set_timeout(self.inner.config.initial_pass_delay(), move |_| {
                if let Some(reconciler) = Self::from_weak(&weak) {
                    reconciler.inner.initial_pass.borrow_mut().take();
                    reconciler.update();
                }
            });
            *self.inner.initial_pass.borrow_mut() = Some(task);
        } else {
            debug!("consent store not published yet, polling");
            self.schedule_poll(&page);
        }
    }

    fn connect(&self, store: ConsentStore) {
        let weak = self.downgrade();
        let subscription = store.on_change(move |_| {
            if let Some(reconciler) = Self::from_weak(&weak) {
                reconciler.update();
            }
            Ok(())
        });
        *self.inner.subscription.borrow_mut() = Some(subscription);
        *self.inner.store.borrow_mut() = Some(store);
        self.inner.availability.set(Availability::Connected);
    }

    fn schedule_poll(&self, page: &Page) {
        let weak = self.downgrade();
        let task = page.set_timeout(self.inner.config.store_poll_interval(), move |page| {
            if let Some(reconciler) = Self::from_weak(&weak) {
                reconciler.poll(page);
            }
        });
        *self.inner.poll.borrow_mut() = Some(task);
    }

    fn poll(&self, page: &Page) {
        self.inner.poll.borrow_mut().take();
        let attempt = self.inner.poll_attempts.get() + 1;
        self.inner.poll_attempts.set(attempt);

        if let Some(store) = self.inner.source.resolve() {
            debug!(attempt, "consent store found");
            self.connect(store);
            self.update();
        } else if attempt >= self.inner.config.store_poll_attempts {
            self.inner.availability.set(Availability::Unavailable);
            warn!(
                attempts = attempt,
                "consent store not found, content restrictions stay inactive"
            );
        } else {
            self.schedule_poll(page);
        }
    }

    /// Block clicks inside restricted or disabled content, except on the
    /// overlay.
    fn install_click_guard(&self, page: &Page) {
        let weak = self.downgrade();
        let id = page.add_listener(
            EventTarget::Document,
            EventKind::Click,
            Phase::Capture,
            move |page, event| {
                let Some(reconciler) = Self::from_weak(&weak) else {
                    return;
                };
                let blocked = {
                    let document = page.document();
                    let restricted = document.closest(event.target, |doc, node| {
                        doc.has_class(node, RestrictionType::Blur.class_name())
                            || doc.has_class(node, RestrictionType::Disable.class_name())
                    });
                    let on_overlay = document
                        .closest(event.target, |doc, node| doc.has_class(node, OVERLAY_CLASS))
                        .is_some();
                    restricted
                        .filter(|_| !on_overlay)
                        .map(|element| document.attribute(element, REQUIRED_ATTR).map(ToString::to_string))
                };
                let Some(category) = blocked else {
                    return;
                };
                event.prevent_default();
                event.stop_propagation();
                if let Some(category) = category {
                    debug!(
                        category = reconciler.config().category_label(&category),
                        "blocked click on restricted content"
                    );
                }
            },
        );
        self.inner.click_guard.set(Some(id));
    }

    fn install_observer(&self, page: &Page) {
        let weak = self.downgrade();
        let id = page.observe(move |page, records| {
            let Some(reconciler) = Self::from_weak(&weak) else {
                return;
            };
            if inserts_gated_content(page, records) {
                reconciler.schedule_debounced(page);
            }
        });
        self.inner.observer.set(Some(id));
    }

    /// Trailing debounce: a new burst restarts the quiet period
    fn schedule_debounced(&self, page: &Page) {
        if let Some(previous) = self.inner.debounce.borrow_mut().take() {
            previous.cancel();
        }
        let weak = self.downgrade();
        let task = page.set_timeout(self.inner.config.debounce(), move |_| {
            if let Some(reconciler) = Self::from_weak(&weak) {
                reconciler.inner.debounce.borrow_mut().take();
                reconciler.update();
            }
        });
        *self.inner.debounce.borrow_mut() = Some(task);
    }

    /// Stop reacting to anything. Presentation already applied stays.
    pub fn dispose(&self) {
        for slot in [
            &self.inner.initial_pass,
            &self.inner.debounce,
            &self.inner.poll,
        ] {
            if let Some(task) = slot.borrow_mut().take() {
                task.cancel();
            }
        }
        if let Some(page) = self.page() {
            if let Some(id) = self.inner.click_guard.take() {
                page.remove_listener(id);
            }
            for (_, id) in self.inner.link_guards.borrow_mut().drain() {
                page.remove_listener(id);
            }
            if let Some(id) = self.inner.observer.take() {
                page.disconnect(id);
            }
        }
        if let Some(subscription) = self.inner.subscription.borrow_mut().take() {
            subscription.unsubscribe();
        }
        self.inner.store.borrow_mut().take();
        self.inner.availability.set(Availability::Disposed);
    }

    /// Full pass: content, forms, links, embeds.
    ///
    /// Returns `None` without touching the page while no store is connected.
    pub fn update(&self) -> Option<ReconcileSummary> {
        let (page, store) = self.context()?;
        let record = store.get();
        let summary = self.content_pass(&page, &record);
        self.forms_pass(&page, &record);
        self.links_pass(&page, &record);
        self.embeds_pass(&page, &record);
        self.inner.passes.set(self.inner.passes.get() + 1);
        debug!(
            restricted = summary.restricted,
            allowed = summary.allowed,
            "reconciliation pass finished"
        );
        Some(summary)
    }

    pub fn update_content(&self) -> Option<ReconcileSummary> {
        let (page, store) = self.context()?;
        Some(self.content_pass(&page, &store.get()))
    }

    pub fn update_forms(&self) {
        if let Some((page, store)) = self.context() {
            self.forms_pass(&page, &store.get());
        }
    }

    pub fn update_links(&self) {
        if let Some((page, store)) = self.context() {
            self.links_pass(&page, &store.get());
        }
    }

    pub fn update_embeds(&self) {
        if let Some((page, store)) = self.context() {
            self.embeds_pass(&page, &store.get());
        }
    }

    /// Apply the restriction presentation to one element
    pub fn restrict(&self, element: NodeId, category: &str, restriction: RestrictionType) {
        if let Some(page) = self.page() {
            self.restrict_on(&page, element, category, restriction);
        }
    }

    /// Remove any restriction presentation from one element
    pub fn unrestrict(&self, element: NodeId) {
        if let Some(page) = self.page() {
            self.unrestrict_on(&page, element);
        }
    }

    /// Page and store for a pass, with markers of removed nodes dropped.
    fn context(&self) -> Option<(Page, ConsentStore)> {
        let page = self.page()?;
        let Some(store) = self.store() else {
            debug!(availability = ?self.availability(), "consent store unavailable, skipping pass");
            return None;
        };
        self.prune_detached(&page);
        Some((page, store))
    }

    /// Forget marker entries, and their listeners, for nodes that are no
    /// longer in the document.
    fn prune_detached(&self, page: &Page) {
        let mut stale = Vec::new();
        {
            let document = page.document();
            self.inner
                .disabled_fields
                .borrow_mut()
                .retain(|field| document.is_connected(*field));
            for guards in [&self.inner.link_guards, &self.inner.affordances] {
                guards.borrow_mut().retain(|node, id| {
                    let connected = document.is_connected(*node);
                    if !connected {
                        stale.push(*id);
                    }
                    connected
                });
            }
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "dropping listeners of removed gated nodes");
        }
        for id in stale {
            page.remove_listener(id);
        }
    }

    #[cfg(test)]
    fn tracked_nodes(&self) -> usize {
        self.inner.disabled_fields.borrow().len()
            + self.inner.link_guards.borrow().len()
            + self.inner.affordances.borrow().len()
    }
}

fn inserts_gated_content(page: &Page, records: &[MutationRecord]) -> bool {
    let document = page.document();
    records
        .iter()
        .flat_map(|record| record.added.iter().copied())
        .any(|node| {
            document.has_attribute(node, REQUIRED_ATTR)
                || document
                    .descendants(node)
                    .into_iter()
                    .any(|descendant| document.has_attribute(descendant, REQUIRED_ATTR))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PartialPreferences;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn gated_page() -> (Page, NodeId) {
        let page = Page::blank("https://localhost/");
        let card = {
            let mut document = page.document_mut();
            let body = document.body();
            let card = document.build("div", &[("data-consent-required", "analytics")], None);
            document.append_child(body, card);
            card
        };
        page.flush_mutations();
        (page, card)
    }

    #[test]
    fn first_pass_runs_after_initial_delay() {
        let (page, card) = gated_page();
        let config = ConsentConfig::default();
        let store = ConsentStore::in_memory(&page, &config);
        let reconciler = ContentReconciler::new(&page, &config, store);
        reconciler.start();
        assert_eq!(reconciler.availability(), Availability::Connected);

        page.advance(Duration::from_millis(99));
        assert_eq!(reconciler.pass_count(), 0);
        page.advance(Duration::from_millis(1));
        assert_eq!(reconciler.pass_count(), 1);
        assert!(page.document().has_class(card, "consent-restricted"));
    }

    #[test]
    fn poll_connects_when_store_appears() {
        let (page, card) = gated_page();
        let config = ConsentConfig::default();
        let reconciler = ContentReconciler::install(&page, &config);
        assert_eq!(reconciler.availability(), Availability::Waiting);

        page.advance(Duration::from_millis(250));
        let store = ConsentStore::install(
            &page,
            &config,
            crate::storage::PreferenceStorage::in_memory(&config, true),
            Rc::new(crate::store::PromptState::new()),
        );
        page.advance(Duration::from_millis(100));
        assert_eq!(reconciler.availability(), Availability::Connected);
        assert_eq!(reconciler.pass_count(), 1);
        assert!(page.document().has_class(card, "consent-restricted"));

        store.set(&PartialPreferences::accept_all());
        assert_eq!(reconciler.pass_count(), 2);
        assert!(!page.document().has_class(card, "consent-restricted"));
    }

    #[test]
    fn removed_gated_nodes_are_forgotten() {
        let page = Page::blank("https://localhost/");
        let (link, form) = {
            let mut document = page.document_mut();
            let body = document.body();
            let link = document.build(
                "a",
                &[("href", "/map"), ("data-consent-required", "functional")],
                None,
            );
            let form = document.build("form", &[("data-consent-required", "functional")], None);
            let field = document.build("input", &[("name", "email")], None);
            document.append_child(form, field);
            document.append_children(body, &[link, form]);
            (link, form)
        };
        let config = ConsentConfig::default();
        let store = ConsentStore::in_memory(&page, &config);
        let reconciler = ContentReconciler::new(&page, &config, store);
        reconciler.start();
        page.advance(Duration::from_millis(100));
        assert!(reconciler.tracked_nodes() > 0);

        {
            let mut document = page.document_mut();
            document.remove(link);
            document.remove(form);
        }
        assert!(reconciler.update().is_some());
        assert_eq!(reconciler.tracked_nodes(), 0);
    }

    #[test]
    fn dispose_stops_reacting_to_changes() {
        let (page, card) = gated_page();
        let config = ConsentConfig::default();
        let store = ConsentStore::in_memory(&page, &config);
        let reconciler = ContentReconciler::new(&page, &config, store.clone());
        reconciler.start();
        reconciler.dispose();

        page.advance(Duration::from_secs(1));
        store.set(&PartialPreferences::reject_all());
        assert_eq!(reconciler.pass_count(), 0);
        assert_eq!(reconciler.update(), None);
        assert_eq!(page.document().attribute(card, STATUS_ATTR), None);
        assert_eq!(reconciler.availability(), Availability::Disposed);
    }
}
