//! Consent store and notifier.
//!
//! Owns the canonical preference record. Every read goes to durable storage;
//! every change is persisted, releases deferred resources, hides the banner
//! and is fanned out to subscribers before `set` returns.

mod loader;
mod prompt;

use std::cell::{Cell, RefCell};
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::ConsentConfig;
use crate::models::{Category, PartialPreferences, PreferenceRecord};
use crate::runtime::{Page, WeakPage};
use crate::storage::PreferenceStorage;

pub use loader::{DeferredLoader, ResourceHandler, ResourceKind, CONSENT_ATTR, LOADED_ATTR};
pub use prompt::{BannerAction, ConsentPrompt, DialogAction, PromptState, SettingsDraft};

/// What a subscriber reports back; failures are logged, never propagated
pub type SubscriberResult = std::result::Result<(), Box<dyn StdError>>;

type Subscriber = Rc<dyn Fn(&PreferenceRecord) -> SubscriberResult>;

struct StoreInner {
    page: WeakPage,
    storage: PreferenceStorage,
    prompt: Rc<dyn ConsentPrompt>,
    loader: DeferredLoader,
    next_id: Cell<u64>,
    subscribers: RefCell<Vec<(u64, Subscriber)>>,
}

/// Cheap-clone handle to the consent store of one page.
#[derive(Clone)]
pub struct ConsentStore {
    inner: Rc<StoreInner>,
}

impl fmt::Debug for ConsentStore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConsentStore")
            .field("subscribers", &self.inner.subscribers.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Registration returned by [`ConsentStore::on_change`].
///
/// Dropping it keeps the subscriber registered.
#[derive(Debug)]
pub struct Subscription {
    store: Weak<StoreInner>,
    id: u64,
}

impl Subscription {
    /// Remove the subscriber; false when it was already gone
    pub fn unsubscribe(&self) -> bool {
        let Some(store) = self.store.upgrade() else {
            return false;
        };
        let mut subscribers = store.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != self.id);
        subscribers.len() != before
    }
}

impl ConsentStore {
    pub fn new(
        page: &Page,
        config: &ConsentConfig,
        storage: PreferenceStorage,
        prompt: Rc<dyn ConsentPrompt>,
    ) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                page: page.downgrade(),
                storage,
                prompt,
                loader: DeferredLoader::new(config.script_timeout()),
                next_id: Cell::new(0),
                subscribers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Store over in-memory backends with a headless prompt
    pub fn in_memory(page: &Page, config: &ConsentConfig) -> Self {
        Self::new(
            page,
            config,
            PreferenceStorage::in_memory(config, page.is_secure()),
            Rc::new(PromptState::new()),
        )
    }

    /// Create the store and publish it on the page
    pub fn install(
        page: &Page,
        config: &ConsentConfig,
        storage: PreferenceStorage,
        prompt: Rc<dyn ConsentPrompt>,
    ) -> Self {
        let store = Self::new(page, config, storage, prompt);
        page.install_consent(store.clone());
        store
    }

    /// Current record, read from storage on every call
    pub fn get(&self) -> PreferenceRecord {
        self.inner.storage.load()
    }

    /// Replace the record with `partial` merged over the defaults.
    pub fn set(&self, partial: &PartialPreferences) -> PreferenceRecord {
        let record = PreferenceRecord::from_partial(partial, Utc::now());
        let written = self.inner.storage.save(&record);
        info!(
            granted = ?record.granted_categories(),
            backends = written,
            "consent preferences updated"
        );

        self.load_deferred(&record);
        self.inner.prompt.hide_banner();
        self.notify(&record);
        record
    }

    /// Whether the category named `category` is granted; unknown names are not
    pub fn has(&self, category: &str) -> bool {
        self.get().allows_key(category)
    }

    pub fn has_category(&self, category: Category) -> bool {
        self.get().allows(category)
    }

    /// Whether the visitor has decided at least once
    pub fn has_decision(&self) -> bool {
        self.get().is_decided()
    }

    /// Register a change callback. The same callback may be registered twice.
    pub fn on_change(
        &self,
        callback: impl Fn(&PreferenceRecord) -> SubscriberResult + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner
            .subscribers
            .borrow_mut()
            .push((id, Rc::new(callback)));
        Subscription {
            store: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Open the settings dialog with the stored choices
    pub fn open(&self) {
        let current = self.get();
        debug!("opening consent settings");
        self.inner.prompt.open_settings(&current);
    }

    /// Page-load hook: restore a previous decision or ask for one.
    pub fn initialize(&self) {
        let record = self.get();
        if record.is_decided() {
            self.inner.prompt.hide_banner();
            self.load_deferred(&record);
        } else {
            debug!("no consent decision stored, showing banner");
            self.inner.prompt.show_banner();
        }
    }

    /// Handle a banner button. Returns the new record when it changed.
    pub fn banner_action(&self, action: BannerAction) -> Option<PreferenceRecord> {
        match action {
            BannerAction::AcceptAll => Some(self.set(&PartialPreferences::accept_all())),
            BannerAction::RejectAll => Some(self.set(&PartialPreferences::reject_all())),
            BannerAction::Settings => {
                self.open();
                None
            }
        }
    }

    /// Handle a settings dialog button. Returns the new record when it changed.
    pub fn dialog_action(&self, action: DialogAction) -> Option<PreferenceRecord> {
        let record = match action {
            DialogAction::Save => {
                let draft = self.inner.prompt.draft()?;
                Some(self.set(&draft.to_partial()))
            }
            DialogAction::RejectAll => Some(self.set(&PartialPreferences::reject_all())),
            DialogAction::Close => None,
        };
        self.inner.prompt.close_settings();
        record
    }

    /// Deferred elements released so far
    pub fn loaded_resources(&self) -> usize {
        self.inner.loader.loaded_count()
    }

    fn load_deferred(&self, record: &PreferenceRecord) {
        let Some(page) = self.inner.page.upgrade() else {
            return;
        };
        let released = self.inner.loader.run(&page, record);
        if released > 0 {
            debug!(released, "released deferred resources");
        }
    }

    /// Deliver `record` to a snapshot of the subscribers. A subscriber that
    /// re-enters `set` triggers a nested delivery of the newer record.
    fn notify(&self, record: &PreferenceRecord) {
        let subscribers: Vec<Subscriber> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect();

        for (index, subscriber) in subscribers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| subscriber(record))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(subscriber = index, "consent subscriber failed: {error}"),
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!(subscriber = index, "consent subscriber panicked: {message}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CookieJar, CookieOptions, LocalStorage, StorageBackend};
    use pretty_assertions::assert_eq;

    struct Fixture {
        page: Page,
        store: ConsentStore,
        prompt: Rc<PromptState>,
        local: Rc<LocalStorage>,
        cookies: Rc<CookieJar>,
    }

    fn fixture() -> Fixture {
        let config = ConsentConfig::default();
        let page = Page::blank("https://shop.example/");
        let local = Rc::new(LocalStorage::in_memory());
        let cookies = Rc::new(CookieJar::in_memory(CookieOptions::from_config(&config, true)));
        let storage = PreferenceStorage::new(
            local.clone(),
            config.storage_key.clone(),
            cookies.clone(),
            config.cookie_name.clone(),
        );
        let prompt = Rc::new(PromptState::new());
        let store = ConsentStore::install(&page, &config, storage, prompt.clone());
        Fixture {
            page,
            store,
            prompt,
            local,
            cookies,
        }
    }

    #[test]
    fn set_forces_necessary_and_reverts_omitted_categories() {
        let Fixture { store, .. } = fixture();
        store.set(&PartialPreferences::accept_all());

        let partial = PartialPreferences {
            necessary: Some(false),
            analytics: Some(true),
            ..PartialPreferences::default()
        };
        let record = store.set(&partial);
        assert!(record.necessary);
        assert!(record.analytics);
        assert!(!record.marketing);
        assert!(!record.functional);
        assert!(record.timestamp.is_some());
        assert_eq!(store.get(), record);
    }

    #[test]
    fn has_reads_categories_by_key() {
        let Fixture { store, .. } = fixture();
        assert!(store.has("necessary"));
        assert!(!store.has("analytics"));

        store.set(&PartialPreferences::default().with(Category::Analytics, true));
        assert!(store.has("analytics"));
        assert!(!store.has("marketing"));
        assert!(!store.has("timestamp"));
        assert!(!store.has("version"));
        assert!(!store.has("Analytics"));
        assert!(store.has_category(Category::Analytics));
    }

    #[test]
    fn set_writes_both_backends() {
        let Fixture {
            store,
            local,
            cookies,
            ..
        } = fixture();
        let record = store.set(&PartialPreferences::accept_all());

        let stored = local.read("cookie-consent").unwrap().unwrap();
        assert_eq!(serde_json::from_str::<PreferenceRecord>(&stored).unwrap(), record);
        let cookie = cookies.read("cookie-consent").unwrap().unwrap();
        assert_eq!(cookie, stored);
    }

    #[test]
    fn set_survives_primary_quota_failure() {
        let Fixture {
            store,
            local,
            cookies,
            ..
        } = fixture();
        local.set_quota(Some(4));

        let record = store.set(&PartialPreferences::reject_all());
        assert!(local.is_empty());
        assert!(cookies.read("cookie-consent").unwrap().is_some());
        assert_eq!(store.get(), record);
    }

    #[test]
    fn subscribers_are_isolated_from_each_other() {
        let Fixture { store, .. } = fixture();
        let calls = Rc::new(Cell::new(0));

        store.on_change(|_| Err("subscriber offline".into()));
        store.on_change(|_| panic!("subscriber bug"));
        let counter = calls.clone();
        store.on_change(move |record| {
            assert!(record.marketing);
            counter.set(counter.get() + 1);
            Ok(())
        });

        let record = store.set(&PartialPreferences::accept_all());
        assert!(record.marketing);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn unsubscribe_reports_previous_registration() {
        let Fixture { store, .. } = fixture();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let subscription = store.on_change(move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });

        store.set(&PartialPreferences::accept_all());
        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        store.set(&PartialPreferences::reject_all());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn reentrant_set_delivers_newest_record_last() {
        let Fixture { store, .. } = fixture();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let inner_store = store.clone();
        store.on_change(move |record| {
            if record.marketing {
                inner_store.set(&PartialPreferences::reject_all());
            }
            Ok(())
        });
        let log = seen.clone();
        store.on_change(move |record| {
            log.borrow_mut().push(record.marketing);
            Ok(())
        });

        store.set(&PartialPreferences::accept_all());
        assert_eq!(*seen.borrow(), vec![false, true]);
        assert!(!store.get().marketing);
    }

    #[test]
    fn initialize_shows_banner_until_decided() {
        let Fixture { store, prompt, .. } = fixture();
        store.initialize();
        assert!(prompt.banner_visible());
        assert!(!store.has_decision());

        store.banner_action(BannerAction::RejectAll);
        assert!(!prompt.banner_visible());
        assert!(store.has_decision());

        prompt.show_banner();
        store.initialize();
        assert!(!prompt.banner_visible());
    }

    #[test]
    fn settings_dialog_saves_draft() {
        let Fixture { store, prompt, .. } = fixture();
        assert_eq!(store.banner_action(BannerAction::Settings), None);
        assert!(prompt.settings_open());

        prompt.toggle(Category::Functional);
        let record = store.dialog_action(DialogAction::Save).unwrap();
        assert!(record.functional);
        assert!(!record.analytics);
        assert!(!prompt.settings_open());

        store.open();
        assert_eq!(prompt.draft().map(|draft| draft.functional), Some(true));
        assert_eq!(store.dialog_action(DialogAction::Close), None);
        assert!(store.get().functional);
    }

    #[test]
    fn save_without_open_dialog_changes_nothing() {
        let Fixture { store, .. } = fixture();
        assert_eq!(store.dialog_action(DialogAction::Save), None);
        assert!(!store.has_decision());
    }

    #[test]
    fn initialize_releases_deferred_resources_for_stored_decision() {
        let Fixture { page, store, .. } = fixture();
        store.set(&PartialPreferences::accept_all());

        let image = {
            let mut document = page.document_mut();
            let body = document.body();
            let image = document.build("img", &[("data-consent", "analytics"), ("data-src", "/pixel.gif")], None);
            document.append_child(body, image);
            image
        };
        store.initialize();
        assert_eq!(page.document().attribute(image, "src"), Some("/pixel.gif"));
        assert_eq!(store.loaded_resources(), 1);
    }
}
