use tollgate_core::runtime::Page;
use tollgate_core::{Category, PartialPreferences, PreferenceRecord};
use tracing::debug;

use crate::commands::common::{print_record, Context};
use crate::error::CliError;

/// Categories chosen on the command line; anything not named is declined
pub const fn partial_from_flags(
    analytics: bool,
    marketing: bool,
    functional: bool,
) -> PartialPreferences {
    PartialPreferences::reject_all()
        .with(Category::Analytics, analytics)
        .with(Category::Marketing, marketing)
        .with(Category::Functional, functional)
}

pub fn apply_preferences(
    context: &Context,
    partial: &PartialPreferences,
) -> Result<PreferenceRecord, CliError> {
    let page = Page::blank(context.origin());
    let store = context.install_store(&page)?;
    let record = store.set(partial);
    debug!(data_dir = %context.data_dir.display(), "stored consent decision");
    Ok(record)
}

pub fn run_set(
    context: &Context,
    partial: &PartialPreferences,
    as_json: bool,
) -> Result<(), CliError> {
    let record = apply_preferences(context, partial)?;
    print_record(&record, &context.config, as_json)
}
