//! Valkey Custom Resource Definition
//!
//! A `Valkey` declares one in-cluster key-value store: image, replica count,
//! admin credentials, optional persistent storage and CPU/memory quotas. The
//! operator materializes it as a Secret, an optional PersistentVolumeClaim,
//! a Deployment and a headless Service, and reports what it observed back in
//! [`ValkeyStatus`].

use std::fmt;

use chrono::{DateTime, Utc};
use kube::api::DynamicObject;
use kube::{CustomResource, Resource as _, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Persistent storage for the datastore
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Whether a PersistentVolumeClaim is attached at /data
    pub enabled: bool,

    /// Requested size (e.g. "200Mi", "1Gi", "10Gi", "1Ti")
    #[schemars(regex(pattern = r"^[0-9]+[MGT]i$"))]
    pub storage: String,
}

/// Compute and storage quotas for each replica
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// CPU quota (e.g. "100m", "1")
    #[schemars(regex(pattern = r"^[0-9]+m?$"))]
    pub cpu: String,

    /// Memory quota (e.g. "512Mi", "1Gi")
    #[schemars(regex(pattern = r"^[0-9]+[KMG]i$"))]
    pub memory: String,

    /// Size of the PersistentVolumeClaim (e.g. "200Mi", "1Gi")
    #[schemars(regex(pattern = r"^[0-9]+[MGT]i$"))]
    pub storage: String,
}

/// Specification for a Valkey instance
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "database.kuberly.io",
    version = "v1alpha1",
    kind = "Valkey",
    plural = "valkeys",
    namespaced,
    status = "ValkeyStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"CPU","type":"string","jsonPath":".spec.resource.cpu"}"#,
    printcolumn = r#"{"name":"Memory","type":"string","jsonPath":".spec.resource.memory"}"#,
    printcolumn = r#"{"name":"Has volume","type":"boolean","jsonPath":".spec.volume.enabled"}"#,
    printcolumn = r#"{"name":"Volume size","type":"string","jsonPath":".spec.volume.storage"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready Replicas","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Last reconcile","type":"date","jsonPath":".status.lastReconcileAt"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ValkeySpec {
    /// Container image of the datastore
    pub image: String,

    /// Desired replica count
    #[schemars(range(min = 0, max = 5))]
    pub replicas: i32,

    /// Admin username
    pub user: String,

    /// Admin password
    pub password: String,

    /// Persistent storage settings
    pub volume: Volume,

    /// CPU/memory/storage quotas
    pub resource: Resource,
}

/// Observed lifecycle state of a Valkey
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstancePhase {
    /// At least one replica is ready
    Healthy,
    /// The last reconcile failed; see `error`
    Failed,
    /// Nothing observed yet
    #[default]
    Unknown,
    /// Dependent objects were just created
    Updating,
    /// No replica is ready
    Stopped,
}

impl fmt::Display for InstancePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Failed => write!(f, "failed"),
            Self::Unknown => write!(f, "unknown"),
            Self::Updating => write!(f, "updating"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Status of a Valkey
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValkeyStatus {
    /// Current phase
    #[serde(default)]
    pub status: InstancePhase,

    /// Failure message, only set when `status` is `failed`
    ///
    /// Serialized as `null` when absent so a merge patch clears a stale message.
    #[serde(default)]
    pub error: Option<String>,

    /// Number of replicas reporting ready
    #[serde(default)]
    pub ready_replicas: i32,

    /// When the status was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_at: Option<DateTime<Utc>>,
}

impl ValkeyStatus {
    /// Status right after dependents were created
    pub fn updating() -> Self {
        Self {
            status: InstancePhase::Updating,
            ..Default::default()
        }
    }

    /// Status when `ready_replicas` replicas are serving
    pub fn healthy(ready_replicas: i32) -> Self {
        Self {
            status: InstancePhase::Healthy,
            ready_replicas,
            ..Default::default()
        }
    }

    /// Status when no replica is ready
    pub fn stopped() -> Self {
        Self {
            status: InstancePhase::Stopped,
            ..Default::default()
        }
    }

    /// Status for a failed reconcile, stamped with `now`
    pub fn failed(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: InstancePhase::Failed,
            error: Some(message.into()),
            ready_replicas: 0,
            last_reconcile_at: Some(now),
        }
    }

    /// Field-wise comparison used to decide whether a status write is needed
    ///
    /// Compares phase, error message and ready replicas. The timestamp is
    /// ignored, and an absent error equals an empty one.
    pub fn is_changed(&self, candidate: &ValkeyStatus) -> bool {
        self.status != candidate.status
            || self.error.as_deref().unwrap_or_default()
                != candidate.error.as_deref().unwrap_or_default()
            || self.ready_replicas != candidate.ready_replicas
    }
}

/// Identity of one instance: the name and namespace shared by the Valkey and
/// all of its dependent objects
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    /// Instance name
    pub name: String,
    /// Instance namespace
    pub namespace: String,
}

impl InstanceRef {
    /// Create a reference
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl Valkey {
    /// Whether the platform has marked this instance for deletion
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether `token` is among this instance's finalizers
    pub fn has_finalizer(&self, token: &str) -> bool {
        self.finalizers().iter().any(|f| f == token)
    }

    /// Name and namespace of this instance
    pub fn instance_ref(&self) -> InstanceRef {
        InstanceRef::new(self.name_any(), self.namespace().unwrap_or_default())
    }

    /// Current status, or the default (`unknown`) when none was written yet
    pub fn current_status(&self) -> ValkeyStatus {
        self.status.clone().unwrap_or_default()
    }
}

/// Decode an untyped object into a [`Valkey`]
///
/// Rejects anything whose apiVersion/kind is not this schema with
/// [`Error::InvalidInputType`] before attempting deserialization.
pub fn decode_instance(obj: DynamicObject) -> Result<Valkey, Error> {
    let expected_api_version = Valkey::api_version(&());
    let expected_kind = Valkey::kind(&());
    let expected = format!("{expected_api_version}/{expected_kind}");

    let found = match &obj.types {
        Some(types) => format!("{}/{}", types.api_version, types.kind),
        None => "<untyped>".to_string(),
    };
    let matches = obj
        .types
        .as_ref()
        .is_some_and(|t| t.api_version == expected_api_version && t.kind == expected_kind);
    if !matches {
        return Err(Error::invalid_input_type(expected, found));
    }

    let value = serde_json::to_value(&obj)?;
    serde_json::from_value(value)
        .map_err(|e| Error::serialization_for_kind(expected_kind.to_string(), e.to_string()))
}
