//! Consent configuration.
//!
//! Provides a unified `ConsentConfig` used by the store, the reconciler and
//! the CLI. Every field has a default, so an empty JSON object is a valid
//! configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::normalize_text_option;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;
/// Longest cookie lifetime browsers honour
pub const MAX_COOKIE_AGE_DAYS: u64 = 400;

/// Tunables for persistence, deferred loading and reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ConsentConfig {
    /// Key used in the key-value backend
    pub storage_key: String,
    /// Cookie name used in the cookie backend
    pub cookie_name: String,
    /// Cookie lifetime in days
    pub cookie_max_age_days: u64,
    /// Wait applied to deferred scripts without `data-timeout`
    pub script_timeout_ms: u64,
    /// Delay before the first reconciliation pass
    pub initial_pass_delay_ms: u64,
    /// Quiet period coalescing mutation-triggered passes
    pub debounce_ms: u64,
    /// Interval between store availability checks
    pub store_poll_interval_ms: u64,
    /// Availability checks before the reconciler gives up
    pub store_poll_attempts: u32,
    /// Human readable names used in notices, keyed by category
    pub category_labels: BTreeMap<String, String>,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            storage_key: "cookie-consent".to_string(),
            cookie_name: "cookie-consent".to_string(),
            cookie_max_age_days: 90,
            script_timeout_ms: 10_000,
            initial_pass_delay_ms: 100,
            debounce_ms: 100,
            store_poll_interval_ms: 100,
            store_poll_attempts: 50,
            category_labels: default_category_labels(),
        }
    }
}

fn default_category_labels() -> BTreeMap<String, String> {
    [
        ("analytics", "Analytics"),
        ("marketing", "Marketing"),
        ("functional", "Functional"),
        ("advertising", "Advertising"),
        ("social", "Social media"),
    ]
    .into_iter()
    .map(|(key, label)| (key.to_string(), label.to_string()))
    .collect()
}

impl ConsentConfig {
    /// Cookie `Max-Age` in seconds
    #[must_use]
    pub const fn cookie_max_age_secs(&self) -> u64 {
        self.cookie_max_age_days.saturating_mul(SECONDS_PER_DAY)
    }

    #[must_use]
    pub const fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    #[must_use]
    pub const fn initial_pass_delay(&self) -> Duration {
        Duration::from_millis(self.initial_pass_delay_ms)
    }

    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub const fn store_poll_interval(&self) -> Duration {
        Duration::from_millis(self.store_poll_interval_ms)
    }

    /// Display name for a category key, falling back to the key itself.
    #[must_use]
    pub fn category_label<'a>(&'a self, category: &'a str) -> &'a str {
        self.category_labels
            .get(category)
            .map_or(category, String::as_str)
    }

    /// Reject values that would break persistence or stall the reconciler.
    pub fn validate(self) -> Result<Self> {
        let storage_key = normalize_text_option(Some(self.storage_key.clone()))
            .ok_or_else(|| Error::InvalidConfig("storage_key must not be empty".to_string()))?;
        let cookie_name = normalize_text_option(Some(self.cookie_name.clone()))
            .ok_or_else(|| Error::InvalidConfig("cookie_name must not be empty".to_string()))?;
        if !is_cookie_token(&cookie_name) {
            return Err(Error::InvalidConfig(format!(
                "cookie_name '{cookie_name}' contains characters not allowed in a cookie name"
            )));
        }
        if self.cookie_max_age_days == 0 || self.cookie_max_age_days > MAX_COOKIE_AGE_DAYS {
            return Err(Error::InvalidConfig(format!(
                "cookie_max_age_days must be between 1 and {MAX_COOKIE_AGE_DAYS}"
            )));
        }
        if self.script_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "script_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.store_poll_interval_ms == 0 || self.store_poll_attempts == 0 {
            return Err(Error::InvalidConfig(
                "store polling needs a non-zero interval and attempt budget".to_string(),
            ));
        }

        Ok(Self {
            storage_key,
            cookie_name,
            ..self
        })
    }
}

/// Parse and validate a configuration from a raw JSON payload.
pub fn parse_config(payload: &str) -> Result<ConsentConfig> {
    let config: ConsentConfig = serde_json::from_str(payload)?;
    config.validate()
}

/// Load a configuration file; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<ConsentConfig> {
    if !path.exists() {
        return Ok(ConsentConfig::default());
    }
    let raw = std::fs::read_to_string(path)?;
    parse_config(&raw)
}

// RFC 6265 token: visible ASCII minus separators.
fn is_cookie_token(value: &str) -> bool {
    value.bytes().all(|byte| {
        byte.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&byte)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = parse_config("{}").expect("empty config should parse");
        assert_eq!(config, ConsentConfig::default());
        assert_eq!(config.cookie_max_age_secs(), 7_776_000);
    }

    #[test]
    fn parse_config_rejects_unknown_fields() {
        let error = parse_config(r#"{ "cookie_domain": ".example.com" }"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn parse_config_rejects_bad_cookie_name() {
        let error = parse_config(r#"{ "cookie_name": "consent;evil" }"#).unwrap_err();
        assert!(matches!(error, Error::InvalidConfig(_)));
    }

    #[test]
    fn parse_config_rejects_zero_poll_budget() {
        let error = parse_config(r#"{ "store_poll_attempts": 0 }"#).unwrap_err();
        assert!(error.to_string().contains("store polling"));
    }

    #[test]
    fn parse_config_bounds_cookie_lifetime() {
        let error = parse_config(r#"{ "cookie_max_age_days": 1000000000000 }"#).unwrap_err();
        assert!(matches!(error, Error::InvalidConfig(_)));
        assert!(parse_config(r#"{ "cookie_max_age_days": 0 }"#).is_err());

        let config = parse_config(r#"{ "cookie_max_age_days": 400 }"#).unwrap();
        assert_eq!(config.cookie_max_age_secs(), 34_560_000);
    }

    #[test]
    fn cookie_lifetime_saturates_instead_of_overflowing() {
        let config = ConsentConfig {
            cookie_max_age_days: u64::MAX,
            ..ConsentConfig::default()
        };
        assert_eq!(config.cookie_max_age_secs(), u64::MAX);
    }

    #[test]
    fn parse_config_trims_storage_key() {
        let config = parse_config(r#"{ "storage_key": "  site-consent " }"#).unwrap();
        assert_eq!(config.storage_key, "site-consent");
    }

    #[test]
    fn category_label_falls_back_to_key() {
        let config = ConsentConfig::default();
        assert_eq!(config.category_label("marketing"), "Marketing");
        assert_eq!(config.category_label("video"), "video");
    }

    #[test]
    fn load_config_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, ConsentConfig::default());
    }
}
