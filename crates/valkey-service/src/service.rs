//! Orchestration of an instance's dependent objects
//!
//! [`ValkeyService`] creates, diffs and tears down the Secret, claim,
//! Deployment and headless Service that back one instance. Create and delete
//! are idempotent: an object that already exists (or is already gone) counts
//! as done, so a retried reconcile converges instead of failing.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::Client;
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use valkey_common::crd::InstanceRef;
use valkey_common::validation::{Validate, Validator};
use valkey_common::SECRET_PASSWORD_KEY;

use crate::client::{KubeObjectClient, ObjectClient};
use crate::manifests::{
    build_deployment, build_pvc, build_secret, build_service, encode_password,
    resource_requirements, same_resources,
};
use crate::request::{CreateRequest, UpdateRequest};
use crate::Error;

/// Observed readiness of an instance's workload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadyState {
    /// Whether at least one replica is ready
    pub ready: bool,
    /// Ready replica count, zero when not ready
    pub ready_replicas: i32,
}

impl ReadyState {
    /// Derive readiness from the workload's reported ready count
    pub fn from_ready_replicas(ready_replicas: i32) -> Self {
        if ready_replicas > 0 {
            Self {
                ready: true,
                ready_replicas,
            }
        } else {
            Self::default()
        }
    }
}

/// Lifecycle operations on an instance's dependent objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstanceService: Send + Sync {
    /// Create every dependent object, skipping those that already exist
    async fn create(&self, request: &CreateRequest) -> Result<(), Error>;

    /// Bring existing dependents in line with the request
    async fn update(&self, request: &UpdateRequest) -> Result<(), Error>;

    /// Remove every dependent object, skipping those already gone
    async fn delete(&self, instance: &InstanceRef) -> Result<(), Error>;

    /// Report whether the workload has ready replicas
    async fn is_ready(&self, instance: &InstanceRef) -> Result<ReadyState, Error>;
}

/// Dependencies of [`ValkeyService`]
#[derive(Clone)]
pub struct ServiceConfig {
    /// Access to the dependent object kinds
    pub client: Arc<dyn ObjectClient>,
    /// Request validation rules
    pub validator: Arc<Validator>,
}

impl ServiceConfig {
    /// Config backed by a live cluster
    pub fn from_client(client: Client, validator: Arc<Validator>) -> Self {
        Self {
            client: Arc::new(KubeObjectClient::new(client)),
            validator,
        }
    }
}

/// [`InstanceService`] over an [`ObjectClient`]
pub struct ValkeyService {
    client: Arc<dyn ObjectClient>,
    validator: Arc<Validator>,
}

impl ValkeyService {
    /// Create a service from its config
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            client: config.client,
            validator: config.validator,
        }
    }
}

/// Turn "already exists" into success
fn absorb_exists(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(e) if e.is_already_exists() => {
            debug!(error = %e, "object already exists, skipping create");
            Ok(())
        }
        other => other,
    }
}

/// Turn "not found" into success
fn absorb_missing(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!(error = %e, "object already gone, skipping delete");
            Ok(())
        }
        other => other,
    }
}

/// Turn "not found" into `None`
fn found<T>(result: Result<T, Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if e.is_not_found() => {
            debug!(error = %e, "object not found, nothing to update");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Apply the requested replica/image/resource changes to a live Deployment
///
/// Returns true when anything differs from the live object. Replicas are only
/// touched when the live object reports a count.
fn apply_deployment_changes(deployment: &mut Deployment, request: &UpdateRequest) -> bool {
    let Some(spec) = deployment.spec.as_mut() else {
        return false;
    };
    let mut changed = false;

    if let (Some(live), Some(&wanted)) = (spec.replicas, request.replicas.as_set()) {
        if live != wanted {
            spec.replicas = Some(wanted);
            changed = true;
        }
    }

    let container = spec
        .template
        .spec
        .as_mut()
        .and_then(|pod| pod.containers.first_mut());
    if let Some(container) = container {
        if let Some(image) = request.image.as_set() {
            if container.image.as_deref() != Some(image.as_str()) {
                container.image = Some(image.clone());
                changed = true;
            }
        }
        if let Some(resource) = request.resource.as_set() {
            let wanted = resource_requirements(resource);
            if !same_resources(container.resources.as_ref(), &wanted) {
                container.resources = Some(wanted);
                changed = true;
            }
        }
    }

    changed
}

#[async_trait]
impl InstanceService for ValkeyService {
    #[instrument(skip(self, request), fields(instance = %request.instance_ref()))]
    async fn create(&self, request: &CreateRequest) -> Result<(), Error> {
        request.validate(&self.validator)?;

        absorb_exists(self.client.create_secret(&build_secret(request)).await)?;
        if request.volume.enabled {
            absorb_exists(self.client.create_pvc(&build_pvc(request)).await)?;
        }
        absorb_exists(
            self.client
                .create_deployment(&build_deployment(request))
                .await,
        )?;
        absorb_exists(
            self.client
                .create_service(&build_service(&request.crd_name, &request.namespace))
                .await,
        )?;

        info!(volume = request.volume.enabled, "created dependent objects");
        Ok(())
    }

    #[instrument(skip(self, request), fields(instance = %request.instance_ref()))]
    async fn update(&self, request: &UpdateRequest) -> Result<(), Error> {
        request.validate(&self.validator)?;
        let (namespace, name) = (request.namespace.as_str(), request.crd_name.as_str());

        if let Some(password) = request.password.as_set().filter(|p| !p.is_empty()) {
            if let Some(mut secret) = found(self.client.get_secret(namespace, name).await)? {
                secret
                    .data
                    .get_or_insert_with(Default::default)
                    .insert(SECRET_PASSWORD_KEY.to_string(), encode_password(password));
                self.client.replace_secret(&secret).await?;
                debug!("rewrote credential secret");
            }
        }

        if let Some(mut deployment) = found(self.client.get_deployment(namespace, name).await)? {
            if apply_deployment_changes(&mut deployment, request) {
                self.client.replace_deployment(&deployment).await?;
                info!("updated deployment");
            } else {
                debug!("deployment already matches request");
            }
        }

        if let Some(service) = found(self.client.get_service(namespace, name).await)? {
            self.client.replace_service(&service).await?;
        }

        Ok(())
    }

    #[instrument(skip(self), fields(instance = %instance))]
    async fn delete(&self, instance: &InstanceRef) -> Result<(), Error> {
        instance.validate(&self.validator)?;
        let (namespace, name) = (instance.namespace.as_str(), instance.name.as_str());

        absorb_missing(self.client.delete_service(namespace, name).await)?;
        absorb_missing(self.client.delete_deployment(namespace, name).await)?;
        absorb_missing(self.client.delete_pvc(namespace, name).await)?;
        absorb_missing(self.client.delete_secret(namespace, name).await)?;

        info!("deleted dependent objects");
        Ok(())
    }

    #[instrument(skip(self), fields(instance = %instance))]
    async fn is_ready(&self, instance: &InstanceRef) -> Result<ReadyState, Error> {
        instance.validate(&self.validator)?;
        let deployment = self
            .client
            .get_deployment(&instance.namespace, &instance.name)
            .await?;
        let ready_replicas = deployment
            .status
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        Ok(ReadyState::from_ready_replicas(ready_replicas))
    }
}
