use std::io::{self, Write};
use std::path::Path;

use clap::CommandFactory;
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};

use crate::cli::{Cli, CompletionShell};
use crate::error::CliError;

const BIN_NAME: &str = "tollgate";

/// Completion script for `shell`
pub fn render_completions(shell: CompletionShell) -> Vec<u8> {
    match shell {
        CompletionShell::Bash => render_with(shells::Bash),
        CompletionShell::Zsh => render_with(shells::Zsh),
        CompletionShell::Fish => render_with(shells::Fish),
    }
}

fn render_with(generator: impl Generator) -> Vec<u8> {
    let mut command = Cli::command();
    let mut script = Vec::new();
    generate(generator, &mut command, BIN_NAME, &mut script);
    script
}

pub fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let script = render_completions(shell);
    match output_path {
        Some(path) => {
            std::fs::write(path, &script)?;
            println!("{}", path.display());
        }
        None => io::stdout().write_all(&script)?,
    }
    Ok(())
}
