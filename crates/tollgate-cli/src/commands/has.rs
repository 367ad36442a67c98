use tollgate_core::runtime::Page;
use tollgate_core::Category;

use crate::commands::common::Context;
use crate::error::CliError;

/// Whether `category` is granted in the stored record.
///
/// Unknown category names are an error rather than a silent "no".
pub fn category_granted(context: &Context, category: &str) -> Result<bool, CliError> {
    let category = category.trim().to_ascii_lowercase();
    category.parse::<Category>()?;
    let page = Page::blank(context.origin());
    let store = context.install_store(&page)?;
    Ok(store.has(&category))
}

pub fn run_has(context: &Context, category: &str) -> Result<(), CliError> {
    if category_granted(context, category)? {
        println!("{}: granted", category.trim());
        Ok(())
    } else {
        Err(CliError::NotGranted(category.trim().to_string()))
    }
}
