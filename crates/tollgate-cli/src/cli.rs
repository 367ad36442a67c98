use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "Inspect stored cookie consent and reconcile gated pages")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the local storage and cookie files
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// JSON consent configuration
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Treat the origin as https (adds the Secure cookie flag)
    #[arg(long, global = true)]
    pub secure: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the stored preference record
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a decision; categories not listed are declined
    Set {
        #[arg(long)]
        analytics: bool,
        #[arg(long)]
        marketing: bool,
        #[arg(long)]
        functional: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Grant every category
    AcceptAll {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Decline every optional category
    RejectAll {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Exit successfully when a category is granted
    Has {
        /// necessary, functional, analytics or marketing
        category: String,
    },
    /// Print the Set-Cookie line for the stored record
    Cookie,
    /// Load a page fixture, apply stored consent and print the result
    Reconcile {
        /// JSON page fixture
        fixture: PathBuf,
        /// How released scripts answer
        #[arg(long, value_enum, default_value_t = FetchMode::Load)]
        fetch: FetchMode,
        /// Virtual time to let pass after start-up
        #[arg(long, default_value = "1000", value_name = "MS")]
        elapse_ms: u64,
        /// Sleep in real time between timers
        #[arg(long)]
        realtime: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Write completion script to file instead of stdout
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

/// Simulated network behaviour for released scripts
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum FetchMode {
    /// Every script loads
    Load,
    /// Every script fails
    Error,
    /// Scripts never answer and run into their timeout
    Hang,
}
