//! CLI Module
//!
//! Command-line interface for the stepgrid demo binary.

pub mod commands;
pub mod session;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use session::{Session, SessionTrack};

/// Stepgrid - multi-track step sequencer engine
#[derive(Parser, Debug)]
#[command(name = "stepgrid")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print tracks, derived rates and keys, loop extension and patterns
    #[command(name = "inspect")]
    Inspect {
        /// Session description (JSON)
        session: PathBuf,
    },

    /// Run the transport in real time and draw the playhead
    #[command(name = "play")]
    Play {
        /// Session description (JSON)
        session: PathBuf,

        /// Number of pattern cycles to play
        #[arg(short, long, default_value_t = 2)]
        cycles: u32,
    },

    /// Render pattern cycles offline to a WAV file
    #[command(name = "render")]
    Render {
        /// Session description (JSON)
        session: PathBuf,

        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,

        /// Number of pattern cycles to render
        #[arg(short, long, default_value_t = 1)]
        cycles: u32,

        /// Output bit depth (16, 24 or 32)
        #[arg(short, long, default_value_t = 24)]
        bits: u16,
    },
}
