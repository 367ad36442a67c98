//! Durable persistence for the preference record.
//!
//! Two redundant backends hold the same JSON document: an origin-scoped
//! key-value store without expiry (primary) and a cookie jar with a bounded
//! lifetime (secondary). Reads fall through primary → secondary → defaults;
//! writes go to both and never fail the caller.

mod cookie;
mod local;

use std::path::Path;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::models::PreferenceRecord;
use crate::util::compact_text;

pub use cookie::{encode_set_cookie, CookieJar, CookieOptions};
pub use local::LocalStorage;

/// A string key-value backend.
///
/// Methods take `&self`: backends are shared between the store and whoever
/// inspects them (tests, the CLI), so implementations use interior
/// mutability.
pub trait StorageBackend {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Read a value, `Ok(None)` when the key is absent
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Store a value under `key`, replacing any previous value
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`; deleting an absent key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

struct Slot {
    backend: Rc<dyn StorageBackend>,
    key: String,
}

/// Reads and writes the preference record across the backend chain.
pub struct PreferenceStorage {
    slots: Vec<Slot>,
}

impl PreferenceStorage {
    /// Chain a primary and a secondary backend, each with its own key.
    pub fn new(
        primary: Rc<dyn StorageBackend>,
        primary_key: impl Into<String>,
        secondary: Rc<dyn StorageBackend>,
        secondary_key: impl Into<String>,
    ) -> Self {
        Self {
            slots: vec![
                Slot {
                    backend: primary,
                    key: primary_key.into(),
                },
                Slot {
                    backend: secondary,
                    key: secondary_key.into(),
                },
            ],
        }
    }

    /// In-memory local storage and cookie jar, as used by tests and previews.
    pub fn in_memory(config: &crate::config::ConsentConfig, secure_origin: bool) -> Self {
        Self::new(
            Rc::new(LocalStorage::in_memory()),
            config.storage_key.clone(),
            Rc::new(CookieJar::in_memory(CookieOptions::from_config(
                config,
                secure_origin,
            ))),
            config.cookie_name.clone(),
        )
    }

    /// File-backed local storage and cookie jar inside `dir`.
    pub fn open_dir(
        dir: &Path,
        config: &crate::config::ConsentConfig,
        secure_origin: bool,
    ) -> Result<Self> {
        let local = LocalStorage::open(dir.join("local-storage.json"))?;
        let cookies = CookieJar::open(
            dir.join("cookies.json"),
            CookieOptions::from_config(config, secure_origin),
        )?;
        Ok(Self::new(
            Rc::new(local),
            config.storage_key.clone(),
            Rc::new(cookies),
            config.cookie_name.clone(),
        ))
    }

    /// Load the record from the first backend holding a parsable copy.
    ///
    /// Never fails: every error degrades to the next backend and finally to
    /// the default record.
    pub fn load(&self) -> PreferenceRecord {
        for slot in &self.slots {
            match slot.backend.read(&slot.key) {
                Ok(Some(raw)) if !raw.is_empty() => {
                    match serde_json::from_str::<PreferenceRecord>(&raw) {
                        Ok(record) => return record.normalized(),
                        Err(error) => debug!(
                            backend = slot.backend.name(),
                            payload = %compact_text(&raw),
                            "ignoring unparsable consent record: {error}"
                        ),
                    }
                }
                Ok(_) => debug!(backend = slot.backend.name(), "no consent record stored"),
                Err(error) => debug!(
                    backend = slot.backend.name(),
                    "consent record read failed: {error}"
                ),
            }
        }
        PreferenceRecord::default()
    }

    /// Write the record to every backend; returns how many accepted it.
    pub fn save(&self, record: &PreferenceRecord) -> usize {
        let data = match serde_json::to_string(record) {
            Ok(data) => data,
            Err(error) => {
                warn!("failed to serialize consent record: {error}");
                return 0;
            }
        };

        let mut written = 0;
        for slot in &self.slots {
            match slot.backend.write(&slot.key, &data) {
                Ok(()) => written += 1,
                Err(error) => warn!(
                    backend = slot.backend.name(),
                    "consent record write failed: {error}"
                ),
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsentConfig;
    use crate::models::PartialPreferences;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn storage() -> (PreferenceStorage, Rc<LocalStorage>, Rc<CookieJar>) {
        let config = ConsentConfig::default();
        let local = Rc::new(LocalStorage::in_memory());
        let cookies = Rc::new(CookieJar::in_memory(CookieOptions::from_config(
            &config, true,
        )));
        let storage = PreferenceStorage::new(
            local.clone(),
            config.storage_key,
            cookies.clone(),
            config.cookie_name,
        );
        (storage, local, cookies)
    }

    fn decided(partial: PartialPreferences) -> PreferenceRecord {
        PreferenceRecord::from_partial(&partial, Utc::now())
    }

    #[test]
    fn load_without_data_returns_defaults() {
        let (storage, _, _) = storage();
        assert_eq!(storage.load(), PreferenceRecord::default());
    }

    #[test]
    fn save_writes_both_backends() {
        let (storage, local, cookies) = storage();
        let record = decided(PartialPreferences::accept_all());
        assert_eq!(storage.save(&record), 2);
        assert!(local.read("cookie-consent").unwrap().is_some());
        assert!(cookies.read("cookie-consent").unwrap().is_some());
    }

    #[test]
    fn cookie_backend_alone_round_trips() {
        let (storage, local, _) = storage();
        let record = decided(PartialPreferences::default().with(
            crate::models::Category::Functional,
            true,
        ));
        storage.save(&record);

        local.set_enabled(false);
        assert_eq!(storage.load(), record);
    }

    #[test]
    fn local_backend_alone_round_trips() {
        let (storage, _, cookies) = storage();
        let record = decided(PartialPreferences::accept_all());
        storage.save(&record);

        cookies.set_enabled(false);
        assert_eq!(storage.load(), record);
    }

    #[test]
    fn corrupt_primary_falls_back_to_cookie() {
        let (storage, local, _) = storage();
        let record = decided(PartialPreferences::reject_all());
        storage.save(&record);

        local.write("cookie-consent", "{not json").unwrap();
        assert_eq!(storage.load(), record);
    }

    #[test]
    fn unrepresentable_cookie_lifetime_still_persists_locally() {
        let config = ConsentConfig::default();
        let local = Rc::new(LocalStorage::in_memory());
        let cookies = Rc::new(CookieJar::in_memory(CookieOptions {
            max_age_secs: Some(u64::MAX / 2),
            secure: true,
        }));
        let storage = PreferenceStorage::new(local, config.storage_key, cookies, config.cookie_name);
        let record = decided(PartialPreferences::accept_all());

        assert_eq!(storage.save(&record), 1);
        assert_eq!(storage.load(), record);
    }

    #[test]
    fn quota_failure_still_persists_cookie() {
        let (storage, local, cookies) = storage();
        local.set_quota(Some(8));
        let record = decided(PartialPreferences::accept_all());

        assert_eq!(storage.save(&record), 1);
        assert!(local.read("cookie-consent").unwrap().is_none());
        assert!(cookies.read("cookie-consent").unwrap().is_some());
        assert_eq!(storage.load(), record);
    }

    #[test]
    fn both_backends_failing_yields_defaults() {
        let (storage, local, cookies) = storage();
        storage.save(&decided(PartialPreferences::accept_all()));
        local.set_enabled(false);
        cookies.set_enabled(false);
        assert_eq!(storage.load(), PreferenceRecord::default());
    }

    #[test]
    fn open_dir_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConsentConfig::default();
        let record = decided(PartialPreferences::accept_all());
        {
            let storage = PreferenceStorage::open_dir(dir.path(), &config, false).unwrap();
            storage.save(&record);
        }
        let reopened = PreferenceStorage::open_dir(dir.path(), &config, false).unwrap();
        assert_eq!(reopened.load(), record);
    }
}
