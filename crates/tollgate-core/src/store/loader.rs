//! Deferred resources: elements whose real source is withheld until their
//! category is granted.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::dom::NodeId;
use crate::events::ConsentEvent;
use crate::models::{Category, PreferenceRecord};
use crate::runtime::{EventKind, EventTarget, ListenerId, Page, Phase, TaskHandle};
use crate::util::parse_positive_millis;

pub const CONSENT_ATTR: &str = "data-consent";
pub const LOADED_ATTR: &str = "data-consent-loaded";

/// How a deferred element gets its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Script,
    Stylesheet,
    Frame,
    Generic,
}

impl ResourceKind {
    pub fn of_tag(tag: &str) -> Self {
        match tag {
            "script" => Self::Script,
            "link" => Self::Stylesheet,
            "iframe" => Self::Frame,
            _ => Self::Generic,
        }
    }
}

/// Releases one kind of deferred resource.
pub trait ResourceHandler {
    fn load(&self, page: &Page, element: NodeId);
}

/// Moves a withheld attribute (`data-src`, `data-href`) onto the live one.
struct PromoteAttribute {
    from: &'static str,
    to: &'static str,
    /// Leave the element alone when it already has the live attribute
    skip_when_present: bool,
}

impl ResourceHandler for PromoteAttribute {
    fn load(&self, page: &Page, element: NodeId) {
        let mut document = page.document_mut();
        let Some(value) = document
            .attribute(element, self.from)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
        else {
            return;
        };
        if self.skip_when_present && document.has_attribute(element, self.to) {
            return;
        }
        document.set_attribute(element, self.to, &value);
        document.remove_attribute(element, self.from);
    }
}

/// Inserts a live `script` after the marker and waits for it.
struct ScriptHandler {
    default_timeout: Duration,
}

impl ResourceHandler for ScriptHandler {
    fn load(&self, page: &Page, element: NodeId) {
        let (source, script) = {
            let mut document = page.document_mut();
            let Some(source) = document
                .attribute(element, "data-src")
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
            else {
                return;
            };
            if document.has_attribute(element, "src") {
                return;
            }

            let timeout_attr = document.attribute(element, "data-timeout");
            let timeout = parse_positive_millis(timeout_attr)
                .map_or(self.default_timeout, Duration::from_millis);
            let attributes = document.attributes(element);
            let classes = document.classes(element).to_vec();

            let script = document.create_element("script");
            for (name, value) in attributes
                .iter()
                .filter(|(name, _)| name != "data-src" && name != CONSENT_ATTR)
            {
                document.set_attribute(script, name, value);
            }
            for class in &classes {
                document.add_class(script, class);
            }
            document.set_attribute(script, "src", &source);
            document.insert_after(element, script);
            drop(document);

            let wait = ScriptWait::new(element, source.clone());
            wait.arm(page, script, timeout);
            (source, script)
        };
        page.request_fetch(script, source.clone());
        debug!(%element, %source, "deferred script requested");
    }
}

/// Shared latch between a script's load, error and timeout paths.
struct ScriptWait {
    marker: NodeId,
    source: String,
    settled: Cell<bool>,
    timer: RefCell<Option<TaskHandle>>,
    listeners: RefCell<Vec<ListenerId>>,
}

impl ScriptWait {
    fn new(marker: NodeId, source: String) -> Rc<Self> {
        Rc::new(Self {
            marker,
            source,
            settled: Cell::new(false),
            timer: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
        })
    }

    fn arm(self: Rc<Self>, page: &Page, script: NodeId, timeout: Duration) {
        let wait = self.clone();
        let timer = page.set_timeout(timeout, move |page| {
            wait.settle(page, Err("Timeout"));
        });
        *self.timer.borrow_mut() = Some(timer);

        for (kind, outcome) in [(EventKind::Load, Ok(())), (EventKind::Error, Err("Load failed"))] {
            let wait = self.clone();
            let id = page.add_listener(EventTarget::Node(script), kind, Phase::Bubble, move |page, _| {
                wait.settle(page, outcome);
            });
            self.listeners.borrow_mut().push(id);
        }
    }

    /// First caller wins; later outcomes are ignored
    fn settle(&self, page: &Page, outcome: Result<(), &'static str>) {
        if self.settled.replace(true) {
            return;
        }
        if let Some(timer) = self.timer.borrow_mut().take() {
            timer.cancel();
        }
        for id in self.listeners.borrow_mut().drain(..) {
            page.remove_listener(id);
        }

        let error = match outcome {
            Ok(()) => {
                page.document_mut()
                    .set_attribute(self.marker, "src", &self.source);
                debug!(source = %self.source, "deferred script loaded");
                None
            }
            Err(reason) => {
                warn!(source = %self.source, reason, "deferred script did not load");
                Some(reason.to_string())
            }
        };
        page.events().emit(ConsentEvent::ScriptLoaded {
            node: self.marker,
            source: self.source.clone(),
            success: error.is_none(),
            error,
        });
    }
}

/// Releases `data-consent` elements whose category is granted.
pub struct DeferredLoader {
    handlers: HashMap<ResourceKind, Box<dyn ResourceHandler>>,
    loaded: RefCell<HashSet<NodeId>>,
}

impl DeferredLoader {
    pub fn new(default_script_timeout: Duration) -> Self {
        let mut handlers: HashMap<ResourceKind, Box<dyn ResourceHandler>> = HashMap::new();
        handlers.insert(
            ResourceKind::Script,
            Box::new(ScriptHandler {
                default_timeout: default_script_timeout,
            }),
        );
        handlers.insert(
            ResourceKind::Stylesheet,
            Box::new(PromoteAttribute {
                from: "data-href",
                to: "href",
                skip_when_present: true,
            }),
        );
        handlers.insert(
            ResourceKind::Frame,
            Box::new(PromoteAttribute {
                from: "data-src",
                to: "src",
                skip_when_present: true,
            }),
        );
        handlers.insert(
            ResourceKind::Generic,
            Box::new(PromoteAttribute {
                from: "data-src",
                to: "src",
                skip_when_present: false,
            }),
        );
        Self {
            handlers,
            loaded: RefCell::new(HashSet::new()),
        }
    }

    /// Scan the page and release everything `record` allows.
    ///
    /// Returns the number of elements dispatched in this run.
    pub fn run(&self, page: &Page, record: &PreferenceRecord) -> usize {
        let candidates: Vec<(NodeId, ResourceKind)> = {
            let document = page.document();
            document
                .query_all(|doc, node| doc.has_attribute(node, CONSENT_ATTR))
                .into_iter()
                .filter(|node| {
                    let category = document.attribute(*node, CONSENT_ATTR).unwrap_or_default();
                    !category.is_empty()
                        && category != Category::Necessary.as_str()
                        && record.allows_key(category)
                        && !document.has_attribute(*node, LOADED_ATTR)
                        && !self.loaded.borrow().contains(node)
                })
                .map(|node| (node, ResourceKind::of_tag(document.tag(node))))
                .collect()
        };

        for (element, kind) in &candidates {
            if let Some(handler) = self.handlers.get(kind) {
                handler.load(page, *element);
            }
            page.document_mut().set_attribute(*element, LOADED_ATTR, "true");
            self.loaded.borrow_mut().insert(*element);
        }
        candidates.len()
    }

    /// Elements released so far
    pub fn loaded_count(&self) -> usize {
        self.loaded.borrow().len()
    }
}
