//! Command-line interface definitions for rwsync.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rwsync_core::Mode;

use crate::analyze::LogKind;

/// Reader-writer synchronization demonstrations.
#[derive(Parser)]
#[command(name = "rwsync", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Print only the header and the final report.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Also trace every enter and exit.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Writers overwrite a shared sentence; readers check it is whole.
    Text(RunArgs),
    /// Writers count primes into a shared counter; readers sample it.
    Prime(PrimeArgs),
    /// Writers append lines to a shared buffer; readers snapshot it.
    File(RunArgs),
    /// Scan a saved text or prime log, or a directory of saved runs, for
    /// torn reads or lost updates.
    Analyze(AnalyzeArgs),
}

/// Arguments shared by every demo.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Number of reader threads [default: depends on the demo].
    #[arg(long)]
    pub readers: Option<usize>,

    /// Number of writer threads [default: depends on the demo].
    #[arg(long)]
    pub writers: Option<usize>,

    /// Run time in seconds.
    #[arg(long, default_value_t = 10)]
    pub duration: u64,

    /// Synchronization mode: vanilla, reader_pref, writer_pref or fair.
    #[arg(long, default_value = "reader_pref")]
    pub mode: Mode,

    /// Seed for the randomized pauses (default: derived from the clock).
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Arguments for the `prime` subcommand.
#[derive(Args, Debug, Clone)]
pub struct PrimeArgs {
    /// Options shared with the other demos.
    #[command(flatten)]
    pub run: RunArgs,

    /// Count primes in [2, RANGE).
    #[arg(long, default_value_t = 1000)]
    pub range: u64,
}

/// Arguments for the `analyze` subcommand.
#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Log file captured from a demo's standard output.
    #[arg(required_unless_present = "dir", conflicts_with = "dir")]
    pub log: Option<PathBuf>,

    /// Demo that produced the log: text or prime.
    #[arg(long, default_value = "text", conflicts_with = "dir")]
    pub kind: LogKind,

    /// Survey every `v1|v2_<mode>_run<N>_<session>.txt` log in DIR.
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Only survey runs of this session.
    #[arg(long, requires = "dir")]
    pub session: Option<String>,

    /// Also write the survey report to this file.
    #[arg(long, short = 'o', requires = "dir")]
    pub output: Option<PathBuf>,
}
