//! Consent preference record

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Schema version written into every persisted record
pub const RECORD_VERSION: u32 = 1;

/// Unit of consent granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Required for the site to work, always granted
    Necessary,
    /// Anonymous usage statistics
    Analytics,
    /// Personalised recommendations and advertising
    Marketing,
    /// Comfort features processed locally
    Functional,
}

impl Category {
    /// Every category, in display order
    pub const ALL: [Self; 4] = [
        Self::Necessary,
        Self::Functional,
        Self::Analytics,
        Self::Marketing,
    ];

    /// Categories the user can switch on and off
    pub const OPTIONAL: [Self; 3] = [Self::Functional, Self::Analytics, Self::Marketing];

    /// Storage/attribute key for this category
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Necessary => "necessary",
            Self::Analytics => "analytics",
            Self::Marketing => "marketing",
            Self::Functional => "functional",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "necessary" => Ok(Self::Necessary),
            "analytics" => Ok(Self::Analytics),
            "marketing" => Ok(Self::Marketing),
            "functional" => Ok(Self::Functional),
            other => Err(Error::UnknownCategory(other.to_string())),
        }
    }
}

/// The canonical consent decision.
///
/// `necessary` is always `true`; records read back from storage pass through
/// [`PreferenceRecord::normalized`] so a tampered value cannot switch it off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    #[serde(default = "granted")]
    pub necessary: bool,
    #[serde(default)]
    pub analytics: bool,
    #[serde(default)]
    pub marketing: bool,
    #[serde(default)]
    pub functional: bool,
    /// Instant of the last explicit decision, `None` before the first one
    #[serde(default, with = "iso_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default = "current_version")]
    pub version: u32,
}

const fn granted() -> bool {
    true
}

const fn current_version() -> u32 {
    RECORD_VERSION
}

impl Default for PreferenceRecord {
    fn default() -> Self {
        Self {
            necessary: true,
            analytics: false,
            marketing: false,
            functional: false,
            timestamp: None,
            version: RECORD_VERSION,
        }
    }
}

impl PreferenceRecord {
    /// Merge `partial` over the default record and stamp it with `decided_at`.
    ///
    /// Categories missing from `partial` fall back to their defaults, not to
    /// any previously stored value. The timestamp is truncated to the
    /// millisecond precision it is persisted with.
    #[must_use]
    pub fn from_partial(partial: &PartialPreferences, decided_at: DateTime<Utc>) -> Self {
        let defaults = Self::default();
        Self {
            necessary: true,
            analytics: partial.analytics.unwrap_or(defaults.analytics),
            marketing: partial.marketing.unwrap_or(defaults.marketing),
            functional: partial.functional.unwrap_or(defaults.functional),
            timestamp: Some(decided_at.trunc_subsecs(3)),
            version: RECORD_VERSION,
        }
    }

    /// Whether `category` is granted
    #[must_use]
    pub const fn allows(&self, category: Category) -> bool {
        match category {
            Category::Necessary => self.necessary,
            Category::Analytics => self.analytics,
            Category::Marketing => self.marketing,
            Category::Functional => self.functional,
        }
    }

    /// Look up a category by its string key; unknown keys are never granted.
    #[must_use]
    pub fn allows_key(&self, key: &str) -> bool {
        key.parse::<Category>()
            .is_ok_and(|category| self.allows(category))
    }

    /// Whether the user has made an explicit decision yet
    #[must_use]
    pub const fn is_decided(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Force the invariants that stored data may have lost.
    #[must_use]
    pub const fn normalized(mut self) -> Self {
        self.necessary = true;
        self
    }

    /// Categories currently granted, necessary included
    #[must_use]
    pub fn granted_categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|category| self.allows(*category))
            .collect()
    }
}

/// An update passed to the store's `set`.
///
/// `necessary` is accepted for wire compatibility but ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub necessary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functional: Option<bool>,
}

impl PartialPreferences {
    /// Every category granted
    #[must_use]
    pub const fn accept_all() -> Self {
        Self {
            necessary: Some(true),
            analytics: Some(true),
            marketing: Some(true),
            functional: Some(true),
        }
    }

    /// Only the necessary category
    #[must_use]
    pub const fn reject_all() -> Self {
        Self {
            necessary: Some(true),
            analytics: Some(false),
            marketing: Some(false),
            functional: Some(false),
        }
    }

    /// Set a single category
    #[must_use]
    pub const fn with(mut self, category: Category, granted: bool) -> Self {
        match category {
            Category::Necessary => self.necessary = Some(granted),
            Category::Analytics => self.analytics = Some(granted),
            Category::Marketing => self.marketing = Some(granted),
            Category::Functional => self.functional = Some(granted),
        }
        self
    }
}

mod iso_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::util::iso_millis;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(instant) => serializer.serialize_str(&iso_millis(*instant)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|value| {
            DateTime::parse_from_rfc3339(&value)
                .map(|instant| instant.with_timezone(&Utc))
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}
