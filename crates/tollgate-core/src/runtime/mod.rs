//! Host model the consent core runs in: a page with timers, DOM events,
//! mutation observers, network completions and modal dialogs.

mod dialogs;
mod page;
mod scheduler;

pub use dialogs::{DialogMessage, ScriptedDialogs, UserDialogs};
pub use page::{
    ClickOutcome, DomEvent, EventKind, EventTarget, FetchOutcome, ListenerId, MutationCallback,
    ObserverId, Page, PendingFetch, Phase, WeakPage,
};
pub use scheduler::{CancellationToken, Scheduler, TaskHandle};
