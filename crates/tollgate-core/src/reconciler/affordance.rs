//! Overlays, form notices and embed placeholders pointing the visitor at the
//! consent settings.

use crate::dom::{Document, NodeId};
use crate::runtime::{EventKind, EventTarget, Page, Phase};

use super::{
    ContentReconciler, EMBED_PLACEHOLDER_CLASS, FORM_NOTICE_CLASS, OVERLAY_CLASS,
};

const DEFAULT_EMBED_SIZE: (u32, u32) = (560, 315);

/// A detached container and the settings button inside it
pub(super) struct Affordance {
    pub container: NodeId,
    pub button: NodeId,
}

pub(super) fn build_overlay(document: &mut Document, label: &str) -> Affordance {
    let container = document.build("div", &[("class", OVERLAY_CLASS)], None);
    let heading = document.build("h4", &[], Some("Cookies required"));
    let message = document.build(
        "p",
        &[],
        Some(&format!("This content requires {label} cookies.")),
    );
    let button = document.build(
        "button",
        &[("type", "button"), ("aria-label", "Open cookie settings")],
        Some("Open settings"),
    );
    document.append_children(container, &[heading, message, button]);
    Affordance { container, button }
}

pub(super) fn build_form_notice(document: &mut Document, label: &str) -> Affordance {
    let container = document.build("div", &[("class", FORM_NOTICE_CLASS)], None);
    let heading = document.build("strong", &[], Some("Cookies required:"));
    let message = document.build(
        "span",
        &[],
        Some(&format!("This form requires {label} cookies.")),
    );
    let button = document.build("button", &[("type", "button")], Some("Settings"));
    document.append_children(container, &[heading, message, button]);
    Affordance { container, button }
}

pub(super) fn build_embed_placeholder(
    document: &mut Document,
    label: &str,
    size: Option<(u32, u32)>,
) -> Affordance {
    let (width, height) = size
        .filter(|(width, height)| *width > 0 && *height > 0)
        .unwrap_or(DEFAULT_EMBED_SIZE);
    let container = document.build("div", &[("class", EMBED_PLACEHOLDER_CLASS)], None);
    document.set_style(container, "width", &format!("{width}px"));
    document.set_style(container, "height", &format!("{height}px"));
    let heading = document.build("h4", &[], Some("Cookies required"));
    let message = document.build(
        "p",
        &[],
        Some(&format!("This content requires {label} cookies.")),
    );
    let button = document.build("button", &[("type", "button")], Some("Enable cookies"));
    document.append_children(container, &[heading, message, button]);
    Affordance { container, button }
}

impl ContentReconciler {
    /// Wire the button of an inserted affordance to the settings dialog
    pub(super) fn activate(&self, page: &Page, affordance: &Affordance) {
        let id = page.add_listener(
            EventTarget::Node(affordance.button),
            EventKind::Click,
            Phase::Bubble,
            |page, event| {
                event.prevent_default();
                if let Some(store) = page.consent() {
                    store.open();
                }
            },
        );
        self.inner
            .affordances
            .borrow_mut()
            .insert(affordance.container, id);
    }

    /// Detach an affordance and drop its button listener
    pub(super) fn retire(&self, page: &Page, container: NodeId) {
        page.document_mut().remove(container);
        if let Some(id) = self.inner.affordances.borrow_mut().remove(&container) {
            page.remove_listener(id);
        }
    }
}
