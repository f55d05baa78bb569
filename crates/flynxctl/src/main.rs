use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd_save;
mod cmd_tree;
mod cmd_validate;
mod common;

#[derive(Parser, Debug)]
#[command(name = "flynxctl", version, about = "Fly-scan NeXus/HDF5 save CLI")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Output JSON where applicable
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Validate a structure configuration against the packaged schema
    Validate {
        /// Configuration XML file
        config: PathBuf,
    },
    /// Print the parsed structure tree
    Tree {
        /// Configuration XML file
        config: PathBuf,
    },
    /// Run a complete save against simulated data sources
    Save {
        /// Configuration XML file
        config: PathBuf,
        /// Output HDF5 file (must not exist yet)
        output: PathBuf,
        /// JSON map of source name to value for the simulator
        #[arg(long)]
        values: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let Cli { verbose, json, cmd } = Cli::parse();

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_target(false)
        .init();

    match cmd {
        Cmd::Validate { config } => cmd_validate::run(&config, json)?,
        Cmd::Tree { config } => cmd_tree::run(&config, json)?,
        Cmd::Save {
            config,
            output,
            values,
        } => cmd_save::run(&config, &output, values.as_deref(), json)?,
    }

    Ok(())
}
