//! Common types for the Valkey operator: CRDs, errors, validation and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;
pub mod validation;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer token the operator places on every Valkey it provisions
pub const VALKEY_FINALIZER: &str = "database.kuberly.io/finalizer";

/// Port the datastore listens on, used by both the container and the headless service
pub const VALKEY_PORT: i32 = 6379;

/// Key inside the credential Secret holding the base64-encoded admin password
pub const SECRET_PASSWORD_KEY: &str = "password";

/// Field manager name used for server-side apply and patches
pub const FIELD_MANAGER: &str = "valkey-operator";

/// Default steady-state requeue interval (seconds) when nothing changed
pub const DEFAULT_REQUEUE_INTERVAL_SECS: u64 = 10;

/// Label key selecting the pods of one instance
pub const APP_LABEL_KEY: &str = "app";

/// Label marking objects created by this operator
pub const MANAGED_BY_LABEL_KEY: &str = "app.kubernetes.io/managed-by";
