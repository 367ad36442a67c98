//! tollgate-core - Consent management core for Tollgate
//!
//! This crate persists cookie-category preferences, releases deferred
//! third-party resources once their category is granted, and keeps gated page
//! content restricted until consent is given. It runs against an in-process
//! page model (document, timers, events) shared by the CLI and the tests.

pub mod config;
pub mod dom;
pub mod error;
pub mod events;
pub mod models;
pub mod reconciler;
pub mod runtime;
pub mod storage;
pub mod store;
pub mod util;


pub use error::{Error, Result};
pub use models::{Category, PartialPreferences, PreferenceRecord};
pub use reconciler::ContentReconciler;
pub use runtime::Page;
pub use store::ConsentStore;
