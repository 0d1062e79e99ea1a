//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for session reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "blecmd")]
#[command(author, version, about = "Send one command to a BLE peripheral, with a hard deadline", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(
        long,
        global = true,
        env = "NO_COLOR",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub no_color: bool,

    /// Stored-targets file (defaults to the user config directory)
    #[arg(long, global = true, env = "BLECMD_TARGETS", value_name = "PATH")]
    pub targets: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Target peripheral and session timing
#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// Peripheral address (MAC address or platform identifier), or use BLECMD_DEVICE env var
    #[arg(short, long, env = "BLECMD_DEVICE")]
    pub device: Option<String>,

    /// Session deadline in seconds
    #[arg(short = 'T', long, value_parser = clap::value_parser!(u64).range(1..=120))]
    pub timeout: Option<u64>,

    /// Sessions to run before giving up on retryable results
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub attempts: Option<u32>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write a payload to a characteristic
    Send {
        #[command(flatten)]
        session: SessionArgs,

        /// Service UUID (full form or 16-bit short form such as A000)
        #[arg(short, long)]
        service: String,

        /// Characteristic UUID (full form or 16-bit short form such as A002)
        #[arg(short, long)]
        characteristic: String,

        /// Payload as hex bytes, e.g. 00 or 0x0a0b
        payload: String,

        /// Write without response
        #[arg(long)]
        no_response: bool,
    },

    /// Put an espresso machine to sleep
    Sleep {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Put the stored machine to sleep, as on host shutdown
    Shutdown {
        /// Session deadline in seconds
        #[arg(short = 'T', long, value_parser = clap::value_parser!(u64).range(1..=120))]
        timeout: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Manage stored shutdown targets
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum TargetAction {
    /// Show stored targets
    Show {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Store the machine address
    SetMachine {
        /// Machine address
        address: String,
    },
    /// Store the scale address and type
    SetScale {
        /// Scale address
        address: String,

        /// Scale type, e.g. decent or acaia
        #[arg(short = 't', long = "type", default_value = "decent")]
        scale_type: String,
    },
    /// Forget the machine address
    ClearMachine,
    /// Forget the scale address
    ClearScale,
}
