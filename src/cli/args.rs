//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// mounttab - inspect fstab, mtab and mountinfo tables
///
/// Parses Linux mount tables, looks entries up by mountpoint, device or
/// tag, and takes the mtab lock.
#[derive(Parser, Debug)]
#[command(name = "mounttab")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "MOUNTTAB_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the entries of a mount table
    List(ListArgs),

    /// Look up one entry
    Find(FindArgs),

    /// Update a data file while holding its lock
    Lock(LockArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Which table to read
#[derive(Parser, Debug)]
pub struct SourceArgs {
    /// Read this file (format guessed) instead of the system tables
    #[arg(short, long, conflicts_with = "mtab")]
    pub file: Option<PathBuf>,

    /// Read the mounted filesystems instead of fstab
    #[arg(short, long)]
    pub mtab: bool,

    /// Canonicalize paths and evaluate tags while matching
    #[arg(long)]
    pub canonicalize: bool,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Only filesystems of these types (e.g. "ext4,xfs" or "nonfs,cifs")
    #[arg(short = 't', long)]
    pub types: Option<String>,

    /// Only entries with these options (e.g. "rw,nouser")
    #[arg(short = 'O', long)]
    pub options: Option<String>,

    /// Walk the mount tree from the root (mountinfo tables only)
    #[arg(long)]
    pub tree: bool,

    /// Output format
    #[arg(long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the find command
#[derive(Parser, Debug)]
pub struct FindArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Mountpoint
    #[arg(short = 'T', long, required_unless_present = "source_spec")]
    pub target: Option<String>,

    /// Device, directory or tag (LABEL=..., UUID=...)
    #[arg(short = 'S', long = "source")]
    pub source_spec: Option<String>,

    /// Search from the end of the table
    #[arg(short, long)]
    pub backward: bool,

    /// Output format
    #[arg(long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the lock command
#[derive(Parser, Debug)]
pub struct LockArgs {
    /// Data file holding a counter
    pub datafile: PathBuf,

    /// Number of increments, each under its own lock
    #[arg(short = 'n', long, default_value = "1")]
    pub count: u32,

    /// Link file ID (defaults to the process ID)
    #[arg(long)]
    pub id: Option<u32>,

    /// Use flock(2) instead of the link protocol
    #[arg(long)]
    pub simple: bool,

    /// Lock timeout in seconds (default: from config)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Hold the lock this many milliseconds per increment
    #[arg(long, default_value = "0")]
    pub hold_ms: u64,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for list and find
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// fstab lines
    Plain,
}
