//! Valkey CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Valkey - provision in-cluster key-value stores
#[derive(Parser, Debug)]
#[command(name = "valkey")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the kubeconfig (inferred when unset)
    #[arg(long, global = true, env = "K8S_KUBECONFIG_PATH")]
    pub kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a Valkey instance from flags
    Create(commands::create::CreateArgs),
    /// Create a Valkey instance from a manifest file
    Apply(commands::apply::ApplyArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let kubeconfig = self.kubeconfig.as_deref();
        match self.command {
            Commands::Create(args) => commands::create::run(args, kubeconfig).await,
            Commands::Apply(args) => commands::apply::run(args, kubeconfig).await,
        }
    }
}
