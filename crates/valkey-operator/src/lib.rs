//! Valkey Kubernetes operator
//!
//! Watches `Valkey` resources and keeps their Secret, claim, Deployment and
//! headless Service in line with the spec, reporting readiness back on the
//! resource status.

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod controller_runner;
pub mod flow;

pub use config::{OperatorArgs, OperatorConfig};
pub use controller::{
    error_policy, finalizers_patch, reconcile, reconcile_instance, status_patch, Context,
    InstanceClient, KubeInstanceClient, ReconcileAction,
};
pub use flow::{FlowOutcome, InstanceFlow, StoppedFinalizers, ValkeyFlow};
