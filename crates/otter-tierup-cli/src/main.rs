use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::EnvFilter;

mod commands;

use commands::stress::StressCommand;

#[derive(Parser)]
#[command(name = "otter-tierup", version, about = "Otter VM background optimizer driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push synthetic recompilation tasks through the optimizer thread
    Stress(StressCommand),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stress(cmd) => cmd.run()?,
    }

    Ok(())
}
