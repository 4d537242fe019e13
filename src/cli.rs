use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tartboot",
    version,
    about = "Unattended Tart VM installs: boot, type the boot command over VNC, shut down"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "tartboot.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print errors and the final summary
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Auto)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Interactive on a terminal, plain otherwise
    Auto,
    /// Spinners and colors
    Interactive,
    /// Plain step lines
    Plain,
    /// JSON lines
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Boot the VM, type the boot command, and keep it running until Ctrl+C
    Up {
        /// Tear the VM down after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print the rendered boot command and the input events it produces
    Render,

    /// Show the latest `tart run` output log
    Log {
        /// Show the latest failed run instead
        #[arg(long)]
        failed: bool,

        /// List every kept log
        #[arg(long, conflicts_with = "failed")]
        all: bool,

        /// Show tartboot's own log instead
        #[arg(long, conflicts_with_all = ["failed", "all"])]
        tartboot: bool,
    },
}
