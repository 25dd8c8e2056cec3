//! Valkey CLI
//!
//! Creates Valkey resources for the operator to reconcile.

use clap::Parser;

use valkey_cli::{Cli, Error, Result};
use valkey_common::telemetry::{init_logging, LogConfig, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogConfig {
        format: LogFormat::Text,
        default_filter: "info".to_string(),
    })
    .map_err(|e| Error::command_failed(e.to_string()))?;

    let cli = Cli::parse();
    cli.run().await
}
