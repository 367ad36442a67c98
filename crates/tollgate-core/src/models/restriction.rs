//! Restriction presentation and per-element status

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a gated element is presented while consent is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionType {
    /// Blurred, with an explanatory overlay
    #[default]
    Blur,
    /// Removed from layout
    Hide,
    /// Visible but inert
    Disable,
}

impl RestrictionType {
    pub const ALL: [Self; 3] = [Self::Blur, Self::Hide, Self::Disable];

    /// Parse `data-restriction-type`; missing or unrecognised values mean blur.
    #[must_use]
    pub fn from_attribute(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("hide") => Self::Hide,
            Some("disable") => Self::Disable,
            _ => Self::Blur,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blur => "blur",
            Self::Hide => "hide",
            Self::Disable => "disable",
        }
    }

    /// Class applied to the element while restricted
    #[must_use]
    pub const fn class_name(self) -> &'static str {
        match self {
            Self::Blur => "consent-restricted",
            Self::Hide => "consent-hidden",
            Self::Disable => "consent-disabled",
        }
    }
}

impl fmt::Display for RestrictionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status written to `data-consent-status` by a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionStatus {
    /// Not yet visited by a pass
    #[default]
    Unknown,
    Allowed,
    Restricted,
}

impl RestrictionStatus {
    /// Read the status back from the attribute value
    #[must_use]
    pub fn from_attribute(raw: Option<&str>) -> Self {
        match raw {
            Some("allowed") => Self::Allowed,
            Some("restricted") => Self::Restricted,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Allowed => "allowed",
            Self::Restricted => "restricted",
        }
    }
}

/// Counts reported after every content pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub restricted: usize,
    pub allowed: usize,
}
