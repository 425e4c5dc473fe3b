//! Root CLI structure for xray-rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xray-rs")]
#[command(about = "Command-line tools for X-Ray engine motion files", long_about = None)]
#[command(version)]
#[command(author)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (can be repeated for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// OMF motion file operations
    Omf {
        #[command(subcommand)]
        command: crate::commands::omf::OmfCommands,
    },

    /// SKL/SKLS editor motion operations
    Skls {
        #[command(subcommand)]
        command: crate::commands::skls::SklsCommands,
    },

    /// Show the chunk layout of any chunked file
    Chunks {
        /// Path to the file
        file: PathBuf,

        /// Maximum depth to display
        #[arg(long)]
        depth: Option<usize>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}
