//! CLI module for the pipeline's batch entrypoint (§6.5).

pub mod commands;
mod output;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Batch media-processing pipeline for drive-thru audio.
#[derive(Parser, Debug)]
#[command(name = "hoptix")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline for a (location, date).
    Run {
        /// Organization id.
        #[arg(long, env = "HOPTIX_ORG_ID")]
        org_id: String,

        /// Location id.
        #[arg(long, env = "HOPTIX_LOCATION_ID")]
        location_id: String,

        /// Human-readable location name, used for the voice-sample folder lookup (§4.5).
        #[arg(long, env = "HOPTIX_LOCATION_NAME")]
        location_name: String,

        /// Date to process, in YYYY-MM-DD form.
        #[arg(long)]
        date: String,

        /// Override the worker-pool parallelism for all three pools.
        #[arg(long)]
        workers: Option<usize>,

        /// Path or URL to the source recording.
        #[arg(long)]
        source: Option<String>,
    },
}
