//! Tollgate CLI - Inspect and edit stored cookie consent
//!
//! Reads and writes the same local storage and cookie files the consent
//! store uses, and replays page fixtures through the content reconciler.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use std::time::Duration;

use clap::Parser;
use tollgate_core::PartialPreferences;

use crate::cli::{Cli, Commands};
use crate::commands::common::Context;
use crate::commands::completions::run_completions;
use crate::commands::cookie::run_cookie;
use crate::commands::has::run_has;
use crate::commands::reconcile::{run_reconcile, Simulation};
use crate::commands::set::{partial_from_flags, run_set};
use crate::commands::show::run_show;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "tollgate=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let context = Context::new(cli.data_dir, cli.config.as_deref(), cli.secure)?;
    match cli.command {
        Commands::Show { json } => run_show(&context, json)?,
        Commands::Set {
            analytics,
            marketing,
            functional,
            json,
        } => run_set(
            &context,
            &partial_from_flags(analytics, marketing, functional),
            json,
        )?,
        Commands::AcceptAll { json } => {
            run_set(&context, &PartialPreferences::accept_all(), json)?;
        }
        Commands::RejectAll { json } => {
            run_set(&context, &PartialPreferences::reject_all(), json)?;
        }
        Commands::Has { category } => run_has(&context, &category)?,
        Commands::Cookie => run_cookie(&context)?,
        Commands::Reconcile {
            fixture,
            fetch,
            elapse_ms,
            realtime,
            json,
        } => {
            let simulation = Simulation {
                fetch,
                elapse: Duration::from_millis(elapse_ms),
                realtime,
            };
            run_reconcile(&context, &fixture, simulation, json).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
