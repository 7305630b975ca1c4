//! CLI argument parsing for the enrichment and trust pipeline.
//!
//! The CLI only maps flags onto config and run options; every decision lives
//! in the pipeline.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "ctrust",
    version,
    about = "Enrich crate metadata with a language model and audit a trust verdict per crate",
    after_help = "Commands:\n  run <crate>...        Enrich and analyze crates in batches, resuming earlier output\n  status <crate>...     Show how much of a work list is already finished\n  verify                Check every trace in the audit log against its execution id\n  config                Print (or write) the default config\n\nExamples:\n  ctrust run serde tokio rand --lm 'ollama run qwen2.5-coder'\n  ctrust run --crates-file crates.txt --budget 5 --skip openssl-sys\n  ctrust status --crates-file crates.txt --json\n  ctrust verify --output ~/.local/share/ctrust/output",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Status(StatusArgs),
    Verify(VerifyArgs),
    Config(ConfigArgs),
}

impl Command {
    pub fn verbose(&self) -> bool {
        match self {
            Command::Run(args) => args.verbose,
            Command::Status(args) => args.verbose,
            Command::Verify(args) => args.verbose,
            Command::Config(_) => false,
        }
    }
}

/// Crate names given inline or through a file.
#[derive(clap::Args, Debug)]
pub struct WorkListArgs {
    /// Crate names to process
    #[arg(value_name = "CRATE")]
    pub crates: Vec<String>,

    /// File with one crate name per line (`#` starts a comment)
    #[arg(long, value_name = "PATH")]
    pub crates_file: Option<PathBuf>,
}

/// Run command inputs.
#[derive(Parser, Debug)]
#[command(about = "Enrich and analyze crates in batches")]
pub struct RunArgs {
    #[command(flatten)]
    pub work: WorkListArgs,

    /// JSON config file (defaults apply when omitted)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Local model command; prompt on stdin, completion on stdout
    #[arg(long, value_name = "CMD")]
    pub lm: Option<String>,

    /// Output directory for records, checkpoints, and reports
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Concurrent records per batch
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Spend ceiling for model calls
    #[arg(long, value_name = "AMOUNT")]
    pub budget: Option<f64>,

    /// Crates to leave out (repeatable or comma-separated)
    #[arg(long, value_name = "CRATE", value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Ignore earlier output and process every crate again
    #[arg(long)]
    pub force_restart: bool,

    /// Read metadata, stats, and scrapes from a fixtures directory
    #[arg(long, value_name = "DIR")]
    pub fixtures: Option<PathBuf>,

    /// Do not scrape documentation sites
    #[arg(long)]
    pub no_scrape: bool,

    /// Skip the summary/feature/classification/pairs pass
    #[arg(long)]
    pub no_enrich: bool,

    /// Emit the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Debug-level logging on stderr
    #[arg(long)]
    pub verbose: bool,
}

/// Status command inputs.
#[derive(Parser, Debug)]
#[command(about = "Show resume state and inference usage for a work list")]
pub struct StatusArgs {
    #[command(flatten)]
    pub work: WorkListArgs,

    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    #[arg(long)]
    pub verbose: bool,
}

/// Verify command inputs.
#[derive(Parser, Debug)]
#[command(about = "Verify every trace in the audit log")]
pub struct VerifyArgs {
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub verbose: bool,
}

/// Config command inputs.
#[derive(Parser, Debug)]
#[command(about = "Print the default config")]
pub struct ConfigArgs {
    /// Write the config here instead of printing it
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(long, requires = "out")]
    pub force: bool,
}
