use crate::commands::common::{print_record, Context};
use crate::error::CliError;

pub fn run_show(context: &Context, as_json: bool) -> Result<(), CliError> {
    let record = context.open_storage(context.secure)?.load();
    print_record(&record, &context.config, as_json)
}
