//! CLI commands

use std::path::PathBuf;

use clap::{Args, ValueEnum};

use lakeforge_common::StackConfig;

use crate::{Error, Result};

pub mod install;
pub mod status;

/// Default stack configuration file
pub const DEFAULT_CONFIG: &str = "lakeforge.yaml";

/// Output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    #[default]
    Text,
    /// JSON
    Json,
}

/// Arguments shared by every command that talks to the stack
#[derive(Args, Debug)]
pub struct StackArgs {
    /// Path to the stack configuration file
    #[arg(short = 'f', long = "config", env = "LAKEFORGE_CONFIG", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Path to kubeconfig file (default: $KUBECONFIG or ~/.kube/config)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl StackArgs {
    /// Load and validate the stack configuration
    pub fn load_config(&self) -> Result<StackConfig> {
        if !self.config.exists() {
            return Err(Error::ConfigNotFound {
                path: self.config.clone(),
            });
        }
        Ok(StackConfig::load(&self.config)?)
    }
}
