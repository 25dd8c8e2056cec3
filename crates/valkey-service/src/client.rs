//! Typed access to the four dependent object kinds
//!
//! [`ObjectClient`] is the only way the orchestration layer touches the
//! platform, so tests can substitute a mock. [`KubeObjectClient`] is the
//! kube-rs implementation; it classifies 404/409 responses into
//! [`Error::NotFound`]/[`Error::AlreadyExists`] so callers can treat them as
//! idempotent outcomes.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

#[cfg(test)]
use mockall::automock;

use valkey_common::FIELD_MANAGER;

use crate::Error;

/// Trait abstracting Kubernetes operations on an instance's dependent objects
///
/// `get_*` return [`Error::NotFound`] when the object is absent, `create_*`
/// return [`Error::AlreadyExists`] when it is already present, and
/// `delete_*` return [`Error::NotFound`] when there was nothing to delete.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<(), Error>;
    /// Get a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error>;
    /// Replace a Secret (the object carries its resourceVersion)
    async fn replace_secret(&self, secret: &Secret) -> Result<(), Error>;
    /// Delete a Secret
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Create a PersistentVolumeClaim
    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<(), Error>;
    /// Delete a PersistentVolumeClaim
    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Create a Deployment
    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), Error>;
    /// Get a Deployment
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, Error>;
    /// Replace a Deployment (the object carries its resourceVersion)
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<(), Error>;
    /// Delete a Deployment
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Create a Service
    async fn create_service(&self, service: &Service) -> Result<(), Error>;
    /// Get a Service
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, Error>;
    /// Replace a Service (the object carries its resourceVersion)
    async fn replace_service(&self, service: &Service) -> Result<(), Error>;
    /// Delete a Service
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeObjectClient {
    client: Client,
}

impl KubeObjectClient {
    /// Create a new KubeObjectClient wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(FIELD_MANAGER.to_string()),
        }
    }

    async fn create<K>(&self, obj: &K) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        trace!(kind = %K::kind(&()), %namespace, %name, "creating object");
        self.api::<K>(&namespace)
            .create(&Self::post_params(), obj)
            .await
            .map_err(|e| Error::from_kube(K::kind(&()), &namespace, &name, e))?;
        Ok(())
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(K::kind(&()), namespace, name, e))
    }

    async fn replace<K>(&self, obj: &K) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        trace!(kind = %K::kind(&()), %namespace, %name, "replacing object");
        self.api::<K>(&namespace)
            .replace(&name, &Self::post_params(), obj)
            .await
            .map_err(|e| Error::from_kube(K::kind(&()), &namespace, &name, e))?;
        Ok(())
    }

    async fn delete<K>(&self, namespace: &str, name: &str) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        trace!(kind = %K::kind(&()), %namespace, %name, "deleting object");
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| Error::from_kube(K::kind(&()), namespace, name, e))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectClient for KubeObjectClient {
    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        self.create(secret).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error> {
        self.get(namespace, name).await
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<(), Error> {
        self.replace(secret).await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete::<Secret>(namespace, name).await
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<(), Error> {
        self.create(pvc).await
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete::<PersistentVolumeClaim>(namespace, name).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        self.create(deployment).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, Error> {
        self.get(namespace, name).await
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        self.replace(deployment).await
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete::<Deployment>(namespace, name).await
    }

    async fn create_service(&self, service: &Service) -> Result<(), Error> {
        self.create(service).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, Error> {
        self.get(namespace, name).await
    }

    async fn replace_service(&self, service: &Service) -> Result<(), Error> {
        self.replace(service).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete::<Service>(namespace, name).await
    }
}
