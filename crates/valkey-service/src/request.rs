//! Create and update requests
//!
//! Updates carry a [`Change`] per field so "leave as is" is distinct from any
//! concrete value, including zero replicas. Validation only checks that
//! required fields are present; quantity formats are enforced by the CRD
//! schema before a request is ever built.

use valkey_common::crd::{InstanceRef, Resource, ValkeySpec, Volume};
use valkey_common::validation::{Validate, ValidationErrors, Validator};

use crate::Error;

/// A requested modification of a single field
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Change<T> {
    /// Leave the live value untouched
    #[default]
    Keep,
    /// Replace the live value
    Set(T),
}

impl<T> Change<T> {
    /// The requested value, if any
    pub fn as_set(&self) -> Option<&T> {
        match self {
            Self::Keep => None,
            Self::Set(value) => Some(value),
        }
    }

    /// Whether a value was requested
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }
}

impl<T> From<Option<T>> for Change<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Keep, Self::Set)
    }
}

/// Everything needed to create the dependent objects of one instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateRequest {
    /// Instance name, shared by every dependent object
    pub crd_name: String,
    /// Instance namespace
    pub namespace: String,
    /// Container image
    pub image: String,
    /// Admin username
    pub user: String,
    /// Admin password (stored base64 encoded in the Secret)
    pub password: String,
    /// Desired replica count
    pub replicas: i32,
    /// Persistent storage settings
    pub volume: Volume,
    /// Compute and storage quotas
    pub resource: Resource,
}

impl CreateRequest {
    /// Build a request from an instance's identity and spec
    pub fn from_spec(instance: &InstanceRef, spec: &ValkeySpec) -> Self {
        Self {
            crd_name: instance.name.clone(),
            namespace: instance.namespace.clone(),
            image: spec.image.clone(),
            user: spec.user.clone(),
            password: spec.password.clone(),
            replicas: spec.replicas,
            volume: spec.volume.clone(),
            resource: spec.resource.clone(),
        }
    }

    /// Identity of the instance this request targets
    pub fn instance_ref(&self) -> InstanceRef {
        InstanceRef::new(&self.crd_name, &self.namespace)
    }
}

impl Validate for CreateRequest {
    fn validate(&self, validator: &Validator) -> Result<(), Error> {
        let mut errors = ValidationErrors::new();
        validator.require(&mut errors, "crd_name", &self.crd_name);
        validator.require(&mut errors, "namespace", &self.namespace);
        validator.require(&mut errors, "image", &self.image);
        validator.require(&mut errors, "user", &self.user);
        validator.require(&mut errors, "password", &self.password);
        validator.require(&mut errors, "resource.cpu", &self.resource.cpu);
        validator.require(&mut errors, "resource.memory", &self.resource.memory);
        if self.volume.enabled {
            // The claim is sized from resource.storage
            validator.require(&mut errors, "resource.storage", &self.resource.storage);
        }
        errors.into_result()
    }
}

/// Field-wise modification of an existing instance
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Instance name
    pub crd_name: String,
    /// Instance namespace
    pub namespace: String,
    /// Container image
    pub image: Change<String>,
    /// Admin username
    pub user: Change<String>,
    /// Admin password; an empty value is treated as [`Change::Keep`]
    pub password: Change<String>,
    /// Replica count
    pub replicas: Change<i32>,
    /// Persistent storage settings
    pub volume: Change<Volume>,
    /// Compute and storage quotas
    pub resource: Change<Resource>,
}

impl UpdateRequest {
    /// A request that changes nothing
    pub fn keep_all(instance: &InstanceRef) -> Self {
        Self {
            crd_name: instance.name.clone(),
            namespace: instance.namespace.clone(),
            ..Default::default()
        }
    }

    /// A request that sets every field from the spec
    pub fn from_spec(instance: &InstanceRef, spec: &ValkeySpec) -> Self {
        Self {
            crd_name: instance.name.clone(),
            namespace: instance.namespace.clone(),
            image: Change::Set(spec.image.clone()),
            user: Change::Set(spec.user.clone()),
            password: Change::Set(spec.password.clone()),
            replicas: Change::Set(spec.replicas),
            volume: Change::Set(spec.volume.clone()),
            resource: Change::Set(spec.resource.clone()),
        }
    }

    /// Identity of the instance this request targets
    pub fn instance_ref(&self) -> InstanceRef {
        InstanceRef::new(&self.crd_name, &self.namespace)
    }
}

impl Validate for UpdateRequest {
    fn validate(&self, validator: &Validator) -> Result<(), Error> {
        let mut errors = ValidationErrors::new();
        validator.require(&mut errors, "crd_name", &self.crd_name);
        validator.require(&mut errors, "namespace", &self.namespace);
        errors.into_result()
    }
}
