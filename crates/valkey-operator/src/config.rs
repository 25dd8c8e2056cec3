//! Operator configuration
//!
//! Every setting is a flag with an environment fallback so the same binary
//! runs from a terminal and from a Deployment manifest.

use std::time::Duration;

use clap::Args;

use valkey_common::telemetry::LogFormat;
use valkey_common::DEFAULT_REQUEUE_INTERVAL_SECS;

use crate::flow::StoppedFinalizers;

/// Command-line settings for the controller
#[derive(Args, Debug, Clone)]
pub struct OperatorArgs {
    /// Watch a single namespace instead of the whole cluster
    #[arg(long = "namespace", env = "VALKEY_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Seconds between checks of an instance whose status did not change
    #[arg(
        long,
        env = "VALKEY_REQUEUE_INTERVAL_SECS",
        default_value_t = DEFAULT_REQUEUE_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub requeue_interval_secs: u64,

    /// Log output format: json or text
    #[arg(long, env = "VALKEY_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,

    /// Drop the finalizer from instances with no ready replicas
    #[arg(long, env = "VALKEY_CLEAR_FINALIZER_WHEN_STOPPED")]
    pub clear_finalizer_when_stopped: bool,

    /// Do not install or upgrade the CRD at startup
    #[arg(long)]
    pub skip_crd_install: bool,
}

impl OperatorArgs {
    /// Settings consumed by the controller
    pub fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            watch_namespace: self.watch_namespace.clone().filter(|ns| !ns.is_empty()),
            requeue_interval: Duration::from_secs(self.requeue_interval_secs),
            stopped_finalizers: if self.clear_finalizer_when_stopped {
                StoppedFinalizers::Clear
            } else {
                StoppedFinalizers::Retain
            },
        }
    }
}

/// Runtime settings of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch; all namespaces when `None`
    pub watch_namespace: Option<String>,
    /// Steady-state requeue interval
    pub requeue_interval: Duration,
    /// Finalizer handling for stopped instances
    pub stopped_finalizers: StoppedFinalizers,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            requeue_interval: Duration::from_secs(DEFAULT_REQUEUE_INTERVAL_SECS),
            stopped_finalizers: StoppedFinalizers::default(),
        }
    }
}
