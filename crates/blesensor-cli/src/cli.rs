//! CLI argument definitions using clap.

use std::path::PathBuf;

use blesensor_core::ValueFormat;
use blesensor_types::BleUuid;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "blesensor")]
#[command(author, version, about = "Publish BLE GATT characteristics as sensor values", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a peripheral and print every sensor event until Ctrl-C
    Watch(WatchArgs),

    /// Load and validate a configuration file
    Check {
        /// Configuration file (defaults to the platform config directory)
        #[arg(short, long, env = "BLESENSOR_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Arguments of the `watch` command.
#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "BLESENSOR_CONFIG", conflicts_with = "service")]
    pub config: Option<PathBuf>,

    /// Device address, platform id or name fragment (overrides the config file)
    #[arg(short, long, env = "BLESENSOR_DEVICE")]
    pub device: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    #[command(flatten)]
    pub source: SourceArgs,
}

/// A single ad-hoc source given on the command line instead of a file.
#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Service UUID (16, 32 or 128-bit)
    #[arg(long, requires = "characteristic")]
    pub service: Option<BleUuid>,

    /// Characteristic UUID
    #[arg(long, requires = "service")]
    pub characteristic: Option<BleUuid>,

    /// Descriptor UUID to read instead of the characteristic value
    #[arg(long, requires = "service")]
    pub descriptor: Option<BleUuid>,

    /// Subscribe to notifications
    #[arg(long)]
    pub notify: bool,

    /// Poll interval in seconds (0 = never poll)
    #[arg(long, default_value = "60")]
    pub interval: u64,

    /// Decode the payload with this format instead of the first byte
    #[arg(long)]
    pub decode: Option<ValueFormat>,

    /// Display name of the source
    #[arg(long)]
    pub name: Option<String>,
}

impl SourceArgs {
    /// Whether a source was given on the command line.
    pub fn is_given(&self) -> bool {
        self.service.is_some()
    }
}
