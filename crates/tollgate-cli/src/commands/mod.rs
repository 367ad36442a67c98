pub mod common;
pub mod completions;
pub mod cookie;
pub mod has;
pub mod reconcile;
pub mod set;
pub mod show;
