//! Stepgrid CLI - Step Sequencer Engine
//!
//! Command-line front end for inspecting, playing and rendering sessions.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stepgrid::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    info!("Stepgrid v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd).await,
        None => {
            println!("Stepgrid v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn handle_command(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Inspect { session } => commands::inspect(&session),
        Commands::Play { session, cycles } => commands::play(&session, cycles).await,
        Commands::Render {
            session,
            output,
            cycles,
            bits,
        } => commands::render(&session, &output, cycles, bits),
    }
}
