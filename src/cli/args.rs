//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "microhost")]
#[command(author, version, about = "Load, sandbox and mount micro-frontend sub-applications", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: SubCommand,

    /// Output format as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output (debug logging unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum SubCommand {
    /// Load and mount the sub-applications of a host manifest
    Run {
        /// Path to the host manifest (JSON)
        manifest: PathBuf,

        /// Asset root, overriding the manifest's `root`
        #[arg(long, env = "MICROHOST_ROOT")]
        root: Option<PathBuf>,

        /// Only load the named apps (repeatable)
        #[arg(long = "app", value_name = "NAME")]
        apps: Vec<String>,

        /// Load and bootstrap without mounting
        #[arg(long)]
        no_mount: bool,

        /// Unmount every mounted app before reporting
        #[arg(long, conflicts_with = "no_mount")]
        unmount: bool,
    },

    /// Fetch and validate every bundle of a manifest without running it
    Check {
        /// Path to the host manifest (JSON)
        manifest: PathBuf,

        /// Asset root, overriding the manifest's `root`
        #[arg(long, env = "MICROHOST_ROOT")]
        root: Option<PathBuf>,
    },

    /// Start an interactive host session
    Repl {
        /// Path to the host manifest (JSON)
        manifest: PathBuf,

        /// Asset root, overriding the manifest's `root`
        #[arg(long, env = "MICROHOST_ROOT")]
        root: Option<PathBuf>,
    },
}
