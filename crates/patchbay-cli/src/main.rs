//! Patchbay CLI - offline driver for patchbay graphs.

mod commands;
mod wav;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "patchbay")]
#[command(author, version, about = "Patchbay audio graph CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a session's nodes, arcs and compiled render sequence
    Info(commands::info::InfoArgs),

    /// Render a session offline to a WAV file
    Render(commands::render::RenderArgs),

    /// Check a session file for errors
    Validate(commands::validate::ValidateArgs),

    /// List built-in processor types
    Processors(commands::processors::ProcessorsArgs),

    /// Write a starter session file
    New(commands::new::NewArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info(args) => commands::info::run(args),
        Commands::Render(args) => commands::render::run(args),
        Commands::Validate(args) => commands::validate::run(args),
        Commands::Processors(args) => commands::processors::run(args),
        Commands::New(args) => commands::new::run(args),
    }
}
