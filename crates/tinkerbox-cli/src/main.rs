//! Tinkerbox command-line host
//!
//! Boots one or more computers with the scripted engine, acts as their
//! display thread while they run and prints what each program logged.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tinkerbox")]
#[command(about = "Virtual computer host", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot computers and run them until they all stop
    Run {
        /// Host configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// First computer id
        #[arg(long, default_value_t = 0)]
        id: u32,
        /// Number of computers to boot
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Boot script to use instead of the ROM's
        #[arg(long)]
        bios: Option<PathBuf>,
        /// Boot debugger instances
        #[arg(long)]
        debugger: bool,
        /// Force standards mode
        #[arg(long)]
        standards: bool,
        /// Do not persist computer settings
        #[arg(long)]
        ephemeral: bool,
    },

    /// Print the effective host configuration
    Config {
        /// Host configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            id,
            count,
            bios,
            debugger,
            standards,
            ephemeral,
        } => commands::run::execute(commands::run::RunArgs {
            config,
            id,
            count,
            bios,
            debugger,
            standards,
            ephemeral,
        }),
        Commands::Config { config } => commands::config::execute(config.as_deref()),
    }
}
