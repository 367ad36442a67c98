//! First-visit banner and settings dialog state.

use std::cell::{Cell, RefCell};

use serde::{Deserialize, Serialize};

use crate::models::{Category, PartialPreferences, PreferenceRecord};

/// Buttons on the first-visit banner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BannerAction {
    AcceptAll,
    RejectAll,
    Settings,
}

/// Buttons in the settings dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DialogAction {
    Save,
    RejectAll,
    Close,
}

/// Toggle positions of an open settings dialog.
///
/// `necessary` has no switch; it is always granted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsDraft {
    pub functional: bool,
    pub analytics: bool,
    pub marketing: bool,
}

impl SettingsDraft {
    pub const fn from_record(record: &PreferenceRecord) -> Self {
        Self {
            functional: record.functional,
            analytics: record.analytics,
            marketing: record.marketing,
        }
    }

    /// Flip one switch, returning its new position. `Necessary` is fixed.
    pub fn toggle(&mut self, category: Category) -> bool {
        match category {
            Category::Necessary => true,
            Category::Functional => {
                self.functional = !self.functional;
                self.functional
            }
            Category::Analytics => {
                self.analytics = !self.analytics;
                self.analytics
            }
            Category::Marketing => {
                self.marketing = !self.marketing;
                self.marketing
            }
        }
    }

    pub const fn to_partial(self) -> PartialPreferences {
        PartialPreferences {
            necessary: Some(true),
            analytics: Some(self.analytics),
            marketing: Some(self.marketing),
            functional: Some(self.functional),
        }
    }
}

/// The preference-editing surface driven by the store.
pub trait ConsentPrompt {
    fn show_banner(&self);

    fn hide_banner(&self);

    /// Open the settings dialog pre-populated from `current`
    fn open_settings(&self, current: &PreferenceRecord);

    fn close_settings(&self);

    /// Current switch positions, `None` while the dialog is closed
    fn draft(&self) -> Option<SettingsDraft>;

    /// Flip a switch in the open dialog; `None` while it is closed
    fn toggle(&self, category: Category) -> Option<bool>;
}

/// Headless prompt that only tracks what would be on screen.
#[derive(Debug, Default)]
pub struct PromptState {
    banner_visible: Cell<bool>,
    settings: RefCell<Option<SettingsDraft>>,
}

impl PromptState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn banner_visible(&self) -> bool {
        self.banner_visible.get()
    }

    pub fn settings_open(&self) -> bool {
        self.settings.borrow().is_some()
    }
}

impl ConsentPrompt for PromptState {
    fn show_banner(&self) {
        self.banner_visible.set(true);
    }

    fn hide_banner(&self) {
        self.banner_visible.set(false);
    }

    fn open_settings(&self, current: &PreferenceRecord) {
        *self.settings.borrow_mut() = Some(SettingsDraft::from_record(current));
    }

    fn close_settings(&self) {
        self.settings.borrow_mut().take();
    }

    fn draft(&self) -> Option<SettingsDraft> {
        *self.settings.borrow()
    }

    fn toggle(&self, category: Category) -> Option<bool> {
        self.settings
            .borrow_mut()
            .as_mut()
            .map(|draft| draft.toggle(category))
    }
}
