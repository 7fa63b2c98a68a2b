use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "difftrack",
    about = "Inspect, compact and replay difftrack diff logs",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with a default `window` for `replay`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Reduce a diff log to an equivalent shorter one
    Compact(CompactArgs),
    /// Group a sequence diff log into contiguous runs
    Squash(SquashArgs),
    /// Replay a diff log through a dispatcher and print the listener's snapshot
    Replay(ReplayArgs),
}

/// Which container a log was recorded against.
#[derive(Args, Clone, Copy, Debug, Default)]
#[group(multiple = false)]
pub struct Shape {
    /// The log holds sequence diffs (default)
    #[arg(long)]
    pub list: bool,
    /// The log holds mapping diffs
    #[arg(long)]
    pub map: bool,
}

impl Shape {
    pub fn is_map(&self) -> bool {
        self.map && !self.list
    }
}

#[derive(Args)]
pub struct CompactArgs {
    pub log: PathBuf,
    #[command(flatten)]
    pub shape: Shape,
}

#[derive(Args)]
pub struct SquashArgs {
    pub log: PathBuf,
}

#[derive(Args)]
pub struct ReplayArgs {
    pub log: PathBuf,
    #[command(flatten)]
    pub shape: Shape,
    /// Show only the first N elements (list logs only)
    #[arg(long)]
    pub window: Option<usize>,
}
