use tracing::debug;

use crate::dom::{Document, NodeId};
use crate::events::ConsentEvent;
use crate::models::{PreferenceRecord, ReconcileSummary, RestrictionStatus, RestrictionType};
use crate::runtime::{EventKind, EventTarget, Page, Phase};

use super::affordance::{build_embed_placeholder, build_form_notice, build_overlay};
use super::{
    ContentReconciler, EMBED_PLACEHOLDER_CLASS, FIELD_MARKER_ATTR, FORM_NOTICE_CLASS,
    ORIGINAL_HREF_ATTR, ORIGINAL_SRC_ATTR, OVERLAY_CLASS, REASON_ATTR, REQUIRED_ATTR,
    RESTRICTION_TYPE_ATTR, STATUS_ATTR,
};

const FORM_FIELDS: [&str; 4] = ["input", "textarea", "select", "button"];

/// Gated elements with the given tags, paired with their category
fn gated(document: &Document, tags: &[&str]) -> Vec<(NodeId, String)> {
    document
        .query_all(|doc, node| {
            doc.has_attribute(node, REQUIRED_ATTR)
                && (tags.is_empty() || tags.iter().any(|tag| *tag == doc.tag(node)))
        })
        .into_iter()
        .map(|node| {
            let category = document.attribute(node, REQUIRED_ATTR).unwrap_or_default();
            (node, category.to_string())
        })
        .collect()
}

fn is_restricted(document: &Document, node: NodeId) -> bool {
    RestrictionType::ALL
        .iter()
        .any(|restriction| document.has_class(node, restriction.class_name()))
}

fn overlays(document: &Document, element: NodeId) -> Vec<NodeId> {
    document
        .children(element)
        .iter()
        .copied()
        .filter(|child| document.has_class(*child, OVERLAY_CLASS))
        .collect()
}

impl ContentReconciler {
    fn label(&self, category: &str) -> String {
        self.config().category_label(category).to_string()
    }

    pub(super) fn content_pass(&self, page: &Page, record: &PreferenceRecord) -> ReconcileSummary {
        let elements: Vec<(NodeId, String, RestrictionType)> = {
            let document = page.document();
            gated(&document, &[])
                .into_iter()
                .map(|(node, category)| {
                    let restriction =
                        RestrictionType::from_attribute(document.attribute(node, RESTRICTION_TYPE_ATTR));
                    (node, category, restriction)
                })
                .collect()
        };

        for (element, category, restriction) in &elements {
            if record.allows_key(category) {
                self.unrestrict_on(page, *element);
            } else {
                self.restrict_on(page, *element, category, *restriction);
            }
        }

        let restricted = {
            let document = page.document();
            document
                .query_all(|doc, node| is_restricted(doc, node))
                .len()
        };
        let summary = ReconcileSummary {
            restricted,
            allowed: elements.len().saturating_sub(restricted),
        };
        page.events().emit(ConsentEvent::RestrictionsUpdated {
            restricted: summary.restricted,
            allowed: summary.allowed,
        });
        summary
    }

    pub(super) fn restrict_on(
        &self,
        page: &Page,
        element: NodeId,
        category: &str,
        restriction: RestrictionType,
    ) {
        let existing = {
            let mut document = page.document_mut();
            for other in RestrictionType::ALL {
                if other != restriction {
                    document.remove_class(element, other.class_name());
                }
            }
            document.add_class(element, restriction.class_name());
            document.set_attribute(element, STATUS_ATTR, RestrictionStatus::Restricted.as_str());
            document.set_attribute(element, REASON_ATTR, &format!("{category}-cookies-required"));
            overlays(&document, element)
        };

        if restriction != RestrictionType::Blur {
            for overlay in existing {
                self.retire(page, overlay);
            }
            return;
        }

        if let Some((_, extra)) = existing.split_first() {
            for overlay in extra {
                self.retire(page, *overlay);
            }
            return;
        }

        let overlay = {
            let mut document = page.document_mut();
            if document.style(element, "position").is_none_or(|position| position == "static") {
                document.set_style(element, "position", "relative");
            }
            let overlay = build_overlay(&mut document, &self.label(category));
            document.append_child(element, overlay.container);
            overlay
        };
        self.activate(page, &overlay);
    }

    pub(super) fn unrestrict_on(&self, page: &Page, element: NodeId) {
        let existing = {
            let mut document = page.document_mut();
            for restriction in RestrictionType::ALL {
                document.remove_class(element, restriction.class_name());
            }
            document.set_attribute(element, STATUS_ATTR, RestrictionStatus::Allowed.as_str());
            document.remove_attribute(element, REASON_ATTR);
            overlays(&document, element)
        };
        for overlay in existing {
            self.retire(page, overlay);
        }
    }

    pub(super) fn forms_pass(&self, page: &Page, record: &PreferenceRecord) {
        let forms = gated(&page.document(), &["form"]);
        for (form, category) in forms {
            if record.allows_key(&category) {
                self.release_form(page, form);
            } else {
                self.lock_form(page, form, &category);
            }
        }
    }

    fn lock_form(&self, page: &Page, form: NodeId, category: &str) {
        let notice = {
            let mut document = page.document_mut();
            let notice = document.child_with_class(form, FORM_NOTICE_CLASS);
            let fields: Vec<NodeId> = document
                .descendants(form)
                .into_iter()
                .filter(|field| FORM_FIELDS.iter().any(|tag| *tag == document.tag(*field)))
                .filter(|field| notice.is_none_or(|notice| !document.contains(notice, *field)))
                .filter(|field| {
                    document
                        .closest(*field, |doc, node| doc.has_class(node, OVERLAY_CLASS))
                        .is_none()
                })
                .collect();

            let mut disabled = self.inner.disabled_fields.borrow_mut();
            for field in fields {
                let ours = disabled.contains(&field) || document.has_attribute(field, FIELD_MARKER_ATTR);
                if !ours && document.is_disabled(field) {
                    continue;
                }
                document.set_disabled(field, true);
                document.set_attribute(field, FIELD_MARKER_ATTR, "true");
                disabled.insert(field);
            }
            drop(disabled);

            if notice.is_some() {
                return;
            }
            let notice = build_form_notice(&mut document, &self.label(category));
            document.prepend_child(form, notice.container);
            notice
        };
        self.activate(page, &notice);
    }

    fn release_form(&self, page: &Page, form: NodeId) {
        let notice = {
            let mut document = page.document_mut();
            let mut disabled = self.inner.disabled_fields.borrow_mut();
            let fields: Vec<NodeId> = document
                .descendants(form)
                .into_iter()
                .filter(|field| disabled.contains(field) || document.has_attribute(*field, FIELD_MARKER_ATTR))
                .collect();
            for field in fields {
                document.set_disabled(field, false);
                document.remove_attribute(field, FIELD_MARKER_ATTR);
                disabled.remove(&field);
            }
            document.child_with_class(form, FORM_NOTICE_CLASS)
        };
        if let Some(notice) = notice {
            self.retire(page, notice);
        }
    }

    pub(super) fn links_pass(&self, page: &Page, record: &PreferenceRecord) {
        let links = gated(&page.document(), &["a"]);
        for (link, category) in links {
            if record.allows_key(&category) {
                self.release_link(page, link);
            } else {
                self.lock_link(page, link, &category);
            }
        }
    }

    fn lock_link(&self, page: &Page, link: NodeId, category: &str) {
        let label = self.label(category);
        {
            let mut document = page.document_mut();
            if !document.has_attribute(link, ORIGINAL_HREF_ATTR) {
                if let Some(href) = document.attribute(link, "href").map(ToString::to_string) {
                    document.set_attribute(link, ORIGINAL_HREF_ATTR, &href);
                }
            }
            document.set_attribute(link, "href", "#");
            document.set_style(link, "opacity", "0.6");
            document.set_attribute(link, "title", &format!("Requires {label} cookies"));
        }

        if self.inner.link_guards.borrow().contains_key(&link) {
            return;
        }
        let id = page.add_listener(
            EventTarget::Node(link),
            EventKind::Click,
            Phase::Bubble,
            move |page, event| {
                event.prevent_default();
                debug!(category = %label, "intercepted click on restricted link");
                let dialogs = page.dialogs();
                dialogs.alert(&format!("This link requires {label} cookies."));
                if dialogs.confirm("Would you like to open the cookie settings?") {
                    if let Some(store) = page.consent() {
                        store.open();
                    }
                }
            },
        );
        self.inner.link_guards.borrow_mut().insert(link, id);
    }

    fn release_link(&self, page: &Page, link: NodeId) {
        let guard = self.inner.link_guards.borrow_mut().remove(&link);
        let mut document = page.document_mut();
        let original = document
            .attribute(link, ORIGINAL_HREF_ATTR)
            .map(ToString::to_string);
        if original.is_none() && guard.is_none() {
            return;
        }
        if let Some(original) = original {
            document.set_attribute(link, "href", &original);
            document.remove_attribute(link, ORIGINAL_HREF_ATTR);
        }
        document.remove_style(link, "opacity");
        document.remove_attribute(link, "title");
        drop(document);
        if let Some(id) = guard {
            page.remove_listener(id);
        }
    }

    pub(super) fn embeds_pass(&self, page: &Page, record: &PreferenceRecord) {
        let embeds = gated(&page.document(), &["iframe", "video"]);
        for (embed, category) in embeds {
            if record.allows_key(&category) {
                self.release_embed(page, embed);
            } else {
                self.lock_embed(page, embed, &category);
            }
        }
    }

    fn lock_embed(&self, page: &Page, embed: NodeId, category: &str) {
        let placeholder = {
            let mut document = page.document_mut();
            if !document.has_attribute(embed, ORIGINAL_SRC_ATTR) {
                if let Some(src) = document.attribute(embed, "src").map(ToString::to_string) {
                    document.set_attribute(embed, ORIGINAL_SRC_ATTR, &src);
                }
            }
            document.remove_attribute(embed, "src");
            document.set_style(embed, "display", "none");

            let present = document
                .next_sibling(embed)
                .is_some_and(|sibling| document.has_class(sibling, EMBED_PLACEHOLDER_CLASS));
            if present {
                return;
            }
            let size = document.size(embed);
            let placeholder = build_embed_placeholder(&mut document, &self.label(category), size);
            document.insert_after(embed, placeholder.container);
            placeholder
        };
        self.activate(page, &placeholder);
    }

    fn release_embed(&self, page: &Page, embed: NodeId) {
        let placeholder = {
            let mut document = page.document_mut();
            if let Some(original) = document
                .attribute(embed, ORIGINAL_SRC_ATTR)
                .map(ToString::to_string)
            {
                if document.attribute(embed, "src") != Some(original.as_str()) {
                    document.set_attribute(embed, "src", &original);
                }
            }
            document.remove_style(embed, "display");
            document
                .next_sibling(embed)
                .filter(|sibling| document.has_class(*sibling, EMBED_PLACEHOLDER_CLASS))
        };
        if let Some(placeholder) = placeholder {
            self.retire(page, placeholder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsentConfig;
    use crate::dom::render_html;
    use crate::models::PartialPreferences;
    use crate::runtime::{DialogMessage, ScriptedDialogs};
    use crate::store::{ConsentStore, PromptState};
    use crate::storage::PreferenceStorage;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    struct Harness {
        page: Page,
        store: ConsentStore,
        reconciler: ContentReconciler,
        dialogs: Rc<ScriptedDialogs>,
        prompt: Rc<PromptState>,
    }

    fn harness(build: impl FnOnce(&mut Document) -> Vec<NodeId>) -> (Harness, Vec<NodeId>) {
        let dialogs = Rc::new(ScriptedDialogs::answering(true));
        let page = Page::new("https://shop.example/", Document::new(), dialogs.clone());
        let nodes = {
            let mut document = page.document_mut();
            let body = document.body();
            let nodes = build(&mut *document);
            document.append_children(body, &nodes);
            nodes
        };
        page.flush_mutations();

        let config = ConsentConfig::default();
        let prompt = Rc::new(PromptState::new());
        let store = ConsentStore::install(
            &page,
            &config,
            PreferenceStorage::in_memory(&config, true),
            prompt.clone(),
        );
        let reconciler = ContentReconciler::new(&page, &config, store.clone());
        reconciler.start();
        (
            Harness {
                page,
                store,
                reconciler,
                dialogs,
                prompt,
            },
            nodes,
        )
    }

    #[test]
    fn restrict_switches_presentation_type() {
        let (h, nodes) = harness(|doc| vec![doc.build("div", &[("data-consent-required", "marketing")], None)]);
        let card = nodes[0];

        h.reconciler.restrict(card, "marketing", RestrictionType::Blur);
        h.reconciler.restrict(card, "marketing", RestrictionType::Blur);
        {
            let document = h.page.document();
            assert_eq!(overlays(&document, card).len(), 1);
            assert_eq!(document.style(card, "position"), Some("relative"));
            assert_eq!(document.attribute(card, REASON_ATTR), Some("marketing-cookies-required"));
        }

        h.reconciler.restrict(card, "marketing", RestrictionType::Hide);
        {
            let document = h.page.document();
            assert!(document.has_class(card, "consent-hidden"));
            assert!(!document.has_class(card, "consent-restricted"));
            assert!(overlays(&document, card).is_empty());
        }

        h.reconciler.unrestrict(card);
        let document = h.page.document();
        assert!(!is_restricted(&document, card));
        assert_eq!(document.attribute(card, STATUS_ATTR), Some("allowed"));
        assert_eq!(document.attribute(card, REASON_ATTR), None);
    }

    #[test]
    fn explicit_position_is_kept() {
        let (h, nodes) = harness(|doc| {
            vec![doc.build(
                "div",
                &[("data-consent-required", "analytics"), ("style", "position: absolute")],
                None,
            )]
        });
        h.reconciler.update();
        assert_eq!(h.page.document().style(nodes[0], "position"), Some("absolute"));
    }

    #[test]
    fn overlay_button_opens_settings() {
        let (h, nodes) = harness(|doc| vec![doc.build("div", &[("data-consent-required", "analytics")], None)]);
        h.reconciler.update();
        let button = {
            let document = h.page.document();
            let overlay = overlays(&document, nodes[0])[0];
            *document.children(overlay).last().unwrap()
        };

        let outcome = h.page.click(button);
        assert!(outcome.default_prevented);
        assert!(h.prompt.settings_open());
    }

    #[test]
    fn content_pass_reports_counts() {
        let (h, _) = harness(|doc| {
            vec![
                doc.build("div", &[("data-consent-required", "analytics")], None),
                doc.build("div", &[("data-consent-required", "marketing"), ("data-restriction-type", "hide")], None),
                doc.build("div", &[("data-consent-required", "functional"), ("data-restriction-type", "disable")], None),
            ]
        });
        h.store.set(&PartialPreferences::default().with(crate::models::Category::Functional, true));

        let summary = h.reconciler.update_content().unwrap();
        assert_eq!(summary, ReconcileSummary { restricted: 2, allowed: 1 });
        assert_eq!(
            h.page.events().history().last(),
            Some(&ConsentEvent::RestrictionsUpdated { restricted: 2, allowed: 1 })
        );
    }

    #[test]
    fn form_fields_disabled_by_others_stay_disabled() {
        let (h, nodes) = harness(|doc| {
            let form = doc.build("form", &[("data-consent-required", "functional")], None);
            let name = doc.build("input", &[("name", "name")], None);
            let locked = doc.build("input", &[("name", "code"), ("disabled", "")], None);
            let submit = doc.build("button", &[("type", "submit")], Some("Send"));
            doc.append_children(form, &[name, locked, submit]);
            vec![form]
        });
        let form = nodes[0];
        let (name, locked, submit) = {
            let document = h.page.document();
            let fields = document.children(form);
            (fields[0], fields[1], fields[2])
        };

        h.reconciler.update();
        h.reconciler.update();
        {
            let document = h.page.document();
            let children = document.children(form);
            assert!(document.has_class(children[0], FORM_NOTICE_CLASS));
            assert_eq!(
                children.iter().filter(|c| document.has_class(**c, FORM_NOTICE_CLASS)).count(),
                1
            );
            let notice_button = *document.children(children[0]).last().unwrap();
            assert!(!document.is_disabled(notice_button));
            assert!(document.is_disabled(name));
            assert!(document.is_disabled(submit));
            assert_eq!(document.attribute(name, FIELD_MARKER_ATTR), Some("true"));
            assert_eq!(document.attribute(locked, FIELD_MARKER_ATTR), None);
        }

        h.store.set(&PartialPreferences::accept_all());
        let document = h.page.document();
        assert!(!document.is_disabled(name));
        assert!(!document.is_disabled(submit));
        assert!(document.is_disabled(locked));
        assert_eq!(document.child_with_class(form, FORM_NOTICE_CLASS), None);
    }

    #[test]
    fn hidden_link_asks_before_opening_settings() {
        let (h, nodes) = harness(|doc| {
            vec![doc.build(
                "a",
                &[
                    ("href", "https://maps.example/store"),
                    ("data-consent-required", "marketing"),
                    ("data-restriction-type", "hide"),
                ],
                Some("Directions"),
            )]
        });
        let link = nodes[0];
        h.reconciler.update();
        h.reconciler.update();

        let outcome = h.page.click(link);
        assert_eq!(outcome.navigate_to, None);
        assert_eq!(
            h.dialogs.messages(),
            vec![
                DialogMessage::Alert("This link requires Marketing cookies.".to_string()),
                DialogMessage::Confirm("Would you like to open the cookie settings?".to_string()),
            ]
        );
        assert!(h.prompt.settings_open());

        h.store.set(&PartialPreferences::accept_all());
        let document = h.page.document();
        assert_eq!(document.attribute(link, "href"), Some("https://maps.example/store"));
        assert_eq!(document.attribute(link, ORIGINAL_HREF_ATTR), None);
        assert_eq!(document.attribute(link, "title"), None);
        assert_eq!(document.style(link, "opacity"), None);
        drop(document);
        assert_eq!(h.page.click(link).navigate_to.as_deref(), Some("https://maps.example/store"));
    }

    #[test]
    fn embed_is_withheld_behind_placeholder() {
        let (h, nodes) = harness(|doc| {
            let frame = doc.build(
                "iframe",
                &[("src", "https://video.example/embed/1"), ("data-consent-required", "marketing")],
                None,
            );
            doc.set_size(frame, 640, 360);
            vec![frame]
        });
        let frame = nodes[0];
        h.reconciler.update();
        h.reconciler.update();
        {
            let document = h.page.document();
            assert_eq!(document.attribute(frame, "src"), None);
            assert_eq!(document.attribute(frame, ORIGINAL_SRC_ATTR), Some("https://video.example/embed/1"));
            assert_eq!(document.style(frame, "display"), Some("none"));
            let placeholder = document.next_sibling(frame).unwrap();
            assert!(document.has_class(placeholder, EMBED_PLACEHOLDER_CLASS));
            assert_eq!(document.style(placeholder, "width"), Some("640px"));
            assert_eq!(document.style(placeholder, "height"), Some("360px"));
            assert_eq!(document.next_sibling(placeholder), None);
        }

        h.store.set(&PartialPreferences::accept_all());
        let document = h.page.document();
        assert_eq!(document.attribute(frame, "src"), Some("https://video.example/embed/1"));
        assert_eq!(document.style(frame, "display"), None);
        assert_eq!(document.next_sibling(frame), None);
    }

    #[test]
    fn update_is_idempotent() {
        let (h, _) = harness(|doc| {
            let form = doc.build("form", &[("data-consent-required", "analytics")], None);
            let field = doc.create_element("textarea");
            doc.append_child(form, field);
            vec![
                doc.build("section", &[("data-consent-required", "analytics")], None),
                form,
                doc.build("a", &[("href", "/x"), ("data-consent-required", "marketing")], None),
                doc.build("video", &[("src", "/v.mp4"), ("data-consent-required", "marketing")], None),
            ]
        });
        h.reconciler.update();
        let first = render_html(&h.page.document());
        h.reconciler.update();
        assert_eq!(render_html(&h.page.document()), first);
        assert_eq!(h.reconciler.pass_count(), 2);
    }
}
