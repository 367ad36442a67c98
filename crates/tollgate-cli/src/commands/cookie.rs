use tollgate_core::storage::{encode_set_cookie, CookieOptions};

use crate::commands::common::Context;
use crate::error::CliError;

/// The `Set-Cookie` style line the page writes for the stored record
pub fn stored_cookie_line(context: &Context) -> Result<String, CliError> {
    let record = context.open_storage(context.secure)?.load();
    let value = serde_json::to_string(&record)?;
    Ok(encode_set_cookie(
        &context.config.cookie_name,
        &value,
        CookieOptions::from_config(&context.config, context.secure),
    ))
}

pub fn run_cookie(context: &Context) -> Result<(), CliError> {
    println!("{}", stored_cookie_line(context)?);
    Ok(())
}
