//! Reconciliation flow
//!
//! Maps an instance's spec, status, finalizers and deletion intent to the
//! status and finalizer set it should have, calling the orchestration service
//! for every side effect. The flow never writes the instance itself; the
//! controller persists whatever it returns.
//!
//! | deleting | finalized | action                 | status                 | finalizers        |
//! |----------|-----------|------------------------|------------------------|-------------------|
//! | yes      | yes       | delete dependents      | unchanged              | own token removed |
//! | yes      | no        | none                   | unchanged              | own token removed |
//! | no       | no        | create dependents      | `updating`             | own token added   |
//! | no       | yes       | update, probe          | `healthy` / `stopped`  | pass-through*     |
//!
//! *On `stopped` the own token is kept unless the flow was built with
//! [`StoppedFinalizers::Clear`].

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use valkey_common::crd::{Valkey, ValkeyStatus};
use valkey_common::{Error, VALKEY_FINALIZER};
use valkey_service::{CreateRequest, InstanceService, UpdateRequest};

/// What happens to the finalizer when the workload has no ready replicas
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoppedFinalizers {
    /// Drop the finalizer, leaving a stopped instance unprotected
    ///
    /// The next pass sees an unfinalized instance and adds the token back, so
    /// while no replica is ready the finalizer is written on every pass and
    /// the `stopped` status is never persisted.
    Clear,
    /// Keep the finalizer so deleting a stopped instance still cleans up
    #[default]
    Retain,
}

/// Result of one flow step
#[derive(Clone, Debug, PartialEq)]
pub struct FlowOutcome {
    /// Status the instance should carry
    pub status: ValkeyStatus,
    /// Finalizers the instance should carry
    pub finalizers: Vec<String>,
}

/// Decision step of reconciliation
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstanceFlow: Send + Sync {
    /// Drive the instance's dependents one step and report the resulting state
    async fn run(&self, instance: &Valkey) -> Result<FlowOutcome, Error>;
}

/// [`InstanceFlow`] backed by an [`InstanceService`]
pub struct ValkeyFlow {
    service: Arc<dyn InstanceService>,
    stopped_finalizers: StoppedFinalizers,
}

impl ValkeyFlow {
    /// Create a flow with the default [`StoppedFinalizers::Retain`] policy
    pub fn new(service: Arc<dyn InstanceService>) -> Self {
        Self {
            service,
            stopped_finalizers: StoppedFinalizers::default(),
        }
    }

    /// Choose what happens to the finalizer on the stopped branch
    pub fn with_stopped_finalizers(mut self, policy: StoppedFinalizers) -> Self {
        self.stopped_finalizers = policy;
        self
    }
}

fn without_own(finalizers: &[String]) -> Vec<String> {
    finalizers
        .iter()
        .filter(|f| f.as_str() != VALKEY_FINALIZER)
        .cloned()
        .collect()
}

fn with_own(finalizers: &[String]) -> Vec<String> {
    let mut finalizers = without_own(finalizers);
    finalizers.push(VALKEY_FINALIZER.to_string());
    finalizers
}

#[async_trait]
impl InstanceFlow for ValkeyFlow {
    #[instrument(skip(self, instance), fields(instance = %instance.instance_ref()))]
    async fn run(&self, instance: &Valkey) -> Result<FlowOutcome, Error> {
        let target = instance.instance_ref();
        let finalizers = instance.finalizers();
        let finalized = instance.has_finalizer(VALKEY_FINALIZER);

        if instance.is_deleting() {
            if finalized {
                self.service.delete(&target).await?;
                info!("dependents removed, releasing finalizer");
            } else {
                debug!("deleting without finalizer, nothing to clean up");
            }
            return Ok(FlowOutcome {
                status: instance.current_status(),
                finalizers: without_own(finalizers),
            });
        }

        if !finalized {
            self.service
                .create(&CreateRequest::from_spec(&target, &instance.spec))
                .await?;
            info!("dependents created");
            return Ok(FlowOutcome {
                status: ValkeyStatus::updating(),
                finalizers: with_own(finalizers),
            });
        }

        self.service
            .update(&UpdateRequest::from_spec(&target, &instance.spec))
            .await?;
        let ready = self.service.is_ready(&target).await?;

        if !ready.ready || ready.ready_replicas == 0 {
            debug!(policy = ?self.stopped_finalizers, "no ready replicas");
            let finalizers = match self.stopped_finalizers {
                StoppedFinalizers::Clear => without_own(finalizers),
                StoppedFinalizers::Retain => finalizers.to_vec(),
            };
            return Ok(FlowOutcome {
                status: ValkeyStatus::stopped(),
                finalizers,
            });
        }

        debug!(ready_replicas = ready.ready_replicas, "instance healthy");
        Ok(FlowOutcome {
            status: ValkeyStatus::healthy(ready.ready_replicas),
            finalizers: finalizers.to_vec(),
        })
    }
}
