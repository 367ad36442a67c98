//! Data models for Tollgate

mod preferences;
mod restriction;

pub use preferences::{Category, PartialPreferences, PreferenceRecord, RECORD_VERSION};
pub use restriction::{ReconcileSummary, RestrictionStatus, RestrictionType};
