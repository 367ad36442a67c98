//! Origin-scoped key-value backend without expiry.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

use super::StorageBackend;

const BACKEND_NAME: &str = "local-storage";

/// Key-value storage in the spirit of `window.localStorage`.
///
/// Entries live in memory and, when opened from a path, are mirrored to a
/// JSON file after every change. A byte quota and an enabled switch let
/// callers reproduce the failure modes of real browsers.
#[derive(Debug)]
pub struct LocalStorage {
    entries: RefCell<BTreeMap<String, String>>,
    path: Option<PathBuf>,
    quota: Cell<Option<usize>>,
    enabled: Cell<bool>,
}

impl LocalStorage {
    /// Storage that forgets everything when dropped
    pub fn in_memory() -> Self {
        Self {
            entries: RefCell::new(BTreeMap::new()),
            path: None,
            quota: Cell::new(None),
            enabled: Cell::new(true),
        }
    }

    /// Storage mirrored to `path`, loading existing entries when present
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            entries: RefCell::new(entries),
            path: Some(path),
            quota: Cell::new(None),
            enabled: Cell::new(true),
        })
    }

    /// Limit the total size of keys plus values, `None` for unlimited
    pub fn set_quota(&self, quota: Option<usize>) {
        self.quota.set(quota);
    }

    /// Switch the backend off, making every operation fail
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.enabled.get() {
            Ok(())
        } else {
            Err(Error::StorageDisabled(BACKEND_NAME))
        }
    }

    fn used_bytes_with(&self, key: &str, value: &str) -> usize {
        let entries = self.entries.borrow();
        let others: usize = entries
            .iter()
            .filter(|(existing, _)| existing.as_str() != key)
            .map(|(existing, stored)| existing.len() + stored.len())
            .sum();
        others + key.len() + value.len()
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(&*self.entries.borrow())?;
        std::fs::write(path, serialized)?;
        Ok(())
    }
}

impl StorageBackend for LocalStorage {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        self.ensure_enabled()?;
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_enabled()?;
        if let Some(quota) = self.quota.get() {
            let needed = self.used_bytes_with(key, value);
            if needed > quota {
                return Err(Error::QuotaExceeded {
                    backend: BACKEND_NAME,
                    needed,
                    quota,
                });
            }
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.ensure_enabled()?;
        self.entries.borrow_mut().remove(key);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_returns_value() {
        let storage = LocalStorage::in_memory();
        storage.write("k", "v").unwrap();
        assert_eq!(storage.read("k").unwrap().as_deref(), Some("v"));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn disabled_storage_rejects_everything() {
        let storage = LocalStorage::in_memory();
        storage.set_enabled(false);
        assert!(matches!(
            storage.read("k"),
            Err(Error::StorageDisabled("local-storage"))
        ));
        assert!(storage.write("k", "v").is_err());
    }

    #[test]
    fn quota_counts_replaced_value_once() {
        let storage = LocalStorage::in_memory();
        storage.set_quota(Some(6));
        storage.write("k", "12345").unwrap();
        storage.write("k", "54321").unwrap();
        let error = storage.write("k", "123456").unwrap_err();
        assert!(matches!(
            error,
            Error::QuotaExceeded {
                needed: 7,
                quota: 6,
                ..
            }
        ));
        assert_eq!(storage.read("k").unwrap().as_deref(), Some("54321"));
    }

    #[test]
    fn open_reads_previous_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("local.json");
        {
            let storage = LocalStorage::open(&path).unwrap();
            storage.write("consent", "{}").unwrap();
        }
        let storage = LocalStorage::open(&path).unwrap();
        assert_eq!(storage.read("consent").unwrap().as_deref(), Some("{}"));

        storage.remove("consent").unwrap();
        let storage = LocalStorage::open(&path).unwrap();
        assert!(storage.is_empty());
    }
}
