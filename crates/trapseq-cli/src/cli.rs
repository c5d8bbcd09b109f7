//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use trapseq_core::RunKind;

/// Camera trap segmentation.
///
/// Groups photos into deployment seasons and detections into sequences,
/// writing run identifiers back onto every record.
#[derive(Debug, Parser)]
#[command(name = "trapseq", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load photos and detections as JSON lines from stdin.
    Import,

    /// Recompute every season from scratch.
    Seasons,

    /// Place unassigned detections into sequences.
    Sequences {
        /// Drop every stored sequence and recompute from scratch.
        #[arg(long)]
        rebuild: bool,
    },

    /// List stored seasons or sequences.
    Runs {
        /// Which runs to list.
        #[arg(long, value_enum, default_value_t = KindArg::Sequence)]
        kind: KindArg,

        /// Output as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Delete sequences that no longer have any detections.
    Prune,

    /// Show record and run counts.
    Status,
}

/// Run kind as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Season,
    Sequence,
}

impl From<KindArg> for RunKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Season => Self::Season,
            KindArg::Sequence => Self::Sequence,
        }
    }
}
