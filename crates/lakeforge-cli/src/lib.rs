//! lakeforge CLI library

pub mod commands;
pub mod error;
pub mod output;

pub use error::{Error, Result};

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// lakeforge - resumable analytics stack bring-up
#[derive(Parser, Debug)]
#[command(name = "lakeforge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the next (or the named) installation phase
    Install(commands::install::InstallArgs),
    /// Show which phases are satisfied
    Status(commands::status::StatusArgs),
}

impl Cli {
    /// Run the CLI command and return the process exit code
    pub async fn run(self) -> Result<ExitCode> {
        match self.command {
            Commands::Install(args) => commands::install::run(args).await,
            Commands::Status(args) => commands::status::run(args).await,
        }
    }
}
