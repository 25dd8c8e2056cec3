//! Controller runner - builds the Valkey controller future

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use valkey_common::crd::Valkey;

use crate::config::OperatorConfig;
use crate::controller::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the Valkey controller future
///
/// The future completes once a shutdown signal is received and in-flight
/// reconciles have been dropped.
pub fn build_valkey_controller(
    client: Client,
    config: &OperatorConfig,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let ctx = Arc::new(Context::from_client(client.clone(), config));
    let instances: Api<Valkey> = match &config.watch_namespace {
        Some(namespace) => {
            tracing::info!(%namespace, "- Valkey controller (single namespace)");
            Api::namespaced(client, namespace)
        }
        None => {
            tracing::info!("- Valkey controller (all namespaces)");
            Api::all(client)
        }
    };

    Box::pin(
        Controller::new(
            instances,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("Valkey")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
