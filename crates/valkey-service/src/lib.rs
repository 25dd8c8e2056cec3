//! Orchestration of the Kubernetes objects backing a Valkey instance
//!
//! Each instance is materialized as four dependent objects sharing its name
//! and namespace:
//!
//! - **Secret**: the admin password, base64-encoded under a well-known key
//! - **PersistentVolumeClaim**: data volume, only when the volume is enabled
//! - **Deployment**: the datastore pods
//! - **Service**: headless endpoint on port 6379
//!
//! [`InstanceService`] creates, updates, deletes and probes them. It knows
//! nothing about the Valkey resource or its finalizers; the operator crate
//! drives it.

#![deny(missing_docs)]

pub mod client;
pub mod manifests;
pub mod request;
pub mod service;

pub use client::{KubeObjectClient, ObjectClient};
pub use request::{Change, CreateRequest, UpdateRequest};
pub use service::{InstanceService, ReadyState, ServiceConfig, ValkeyService};

pub(crate) use valkey_common::Error;
