//! Valkey Operator - reconciles Valkey resources into running datastores

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;

use valkey_common::crd::Valkey;
use valkey_common::kube_utils::{apply_crd, create_client};
use valkey_common::telemetry::{init_logging, LogConfig};
use valkey_common::FIELD_MANAGER;
use valkey_operator::controller_runner::build_valkey_controller;
use valkey_operator::OperatorArgs;

/// Valkey - CRD-driven operator for in-cluster key-value stores
#[derive(Parser, Debug)]
#[command(name = "valkey-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    args: OperatorArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Valkey::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_logging(LogConfig {
        format: cli.args.log_format,
        ..Default::default()
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(&cli.args).await,
    }
}

async fn run_controller(args: &OperatorArgs) -> anyhow::Result<()> {
    let config = args.operator_config();
    tracing::info!(
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        requeue_secs = config.requeue_interval.as_secs(),
        stopped_finalizers = ?config.stopped_finalizers,
        "Starting Valkey controller"
    );

    let client = create_client(None)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if args.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        apply_crd(&client, &Valkey::crd(), FIELD_MANAGER)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install Valkey CRD: {}", e))?;
    }

    build_valkey_controller(client, &config).await;

    tracing::info!("Valkey controller stopped");
    Ok(())
}
