//! Error types for the Valkey operator
//!
//! Errors are structured with fields to aid debugging in production. The
//! orchestration layer relies on [`Error::NotFound`] and [`Error::AlreadyExists`]
//! to make create/delete idempotent, so raw kube errors should be classified
//! with [`Error::from_kube`] at the API boundary.

use thiserror::Error;

use crate::validation::ValidationErrors;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Valkey operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that is neither "not found" nor "already exists"
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Object does not exist on the platform
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Object kind (Secret, Deployment, ...)
        kind: String,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
    },

    /// Object already exists on the platform
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Object kind (Secret, Deployment, ...)
        kind: String,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
    },

    /// Request fields failed validation
    #[error("validation error: {errors}")]
    Validation {
        /// Every field that failed, in declaration order
        errors: ValidationErrors,
    },

    /// An object of the wrong kind was presented where a Valkey was expected
    #[error("invalid input type: expected {expected}, found {found}")]
    InvalidInputType {
        /// The apiVersion/kind that was expected
        expected: String,
        /// The apiVersion/kind that was found
        found: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "controller")
        context: String,
    },
}

impl Error {
    /// Classify a raw kube error for an object of `kind` at `namespace/name`
    ///
    /// 404 responses become [`Error::NotFound`], 409 responses with reason
    /// `AlreadyExists` become [`Error::AlreadyExists`]. Everything else,
    /// including 409 `Conflict` from a stale resourceVersion, stays a
    /// [`Error::Kube`].
    pub fn from_kube(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        err: kube::Error,
    ) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound {
                kind: kind.into(),
                namespace: namespace.into(),
                name: name.into(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind: kind.into(),
                    namespace: namespace.into(),
                    name: name.into(),
                }
            }
            other => Self::Kube { source: other },
        }
    }

    /// Create a not-found error
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create an input-shape error
    pub fn invalid_input_type(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::InvalidInputType {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether the platform reported the object as absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Whether the platform rejected a create because the object exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409 && ae.reason == "AlreadyExists",
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Input-shape, validation and serialization errors need a spec or code
    /// fix. A missing object at write time means the instance is gone.
    /// Kubernetes errors are retried unless they are 4xx responses, except
    /// 409 (optimistic concurrency) and 429 (throttling).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    !(400..500).contains(&ae.code) || ae.code == 409 || ae.code == 429
                }
                _ => true,
            },
            Error::NotFound { .. } => false,
            Error::AlreadyExists { .. } => true,
            Error::Validation { .. } => false,
            Error::InvalidInputType { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation { errors }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} ({code})"),
        reason: reason.to_string(),
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FieldError;

    // ==========================================================================
    // Story Tests: Error classification at the platform boundary
    // ==========================================================================

    /// Story: A 404 from the API server becomes a structured NotFound
    ///
    /// Idempotent deletes and tolerant updates depend on recognizing the
    /// absent-object case without string matching.
    #[test]
    fn story_not_found_is_classified() {
        let err = Error::from_kube("Deployment", "default", "valkey", api_error(404, "NotFound"));
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
        assert_eq!(err.to_string(), "Deployment default/valkey not found");
        assert!(!err.is_retryable());
    }

    /// Story: A second create of the same object is recognized as AlreadyExists
    #[test]
    fn story_already_exists_is_classified() {
        let err = Error::from_kube("Secret", "default", "valkey", api_error(409, "AlreadyExists"));
        assert!(err.is_already_exists());
        assert!(!err.is_not_found());
        match &err {
            Error::AlreadyExists { kind, name, .. } => {
                assert_eq!(kind, "Secret");
                assert_eq!(name, "valkey");
            }
            _ => panic!("Expected AlreadyExists variant"),
        }
    }

    /// Story: A stale resourceVersion write is a retryable conflict, not AlreadyExists
    #[test]
    fn story_optimistic_concurrency_conflict_is_retryable() {
        let err = Error::from_kube("Valkey", "default", "valkey", api_error(409, "Conflict"));
        assert!(!err.is_already_exists());
        assert!(matches!(err, Error::Kube { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        let err = Error::from(api_error(422, "Invalid"));
        assert!(!err.is_retryable());

        let err = Error::from(api_error(429, "TooManyRequests"));
        assert!(err.is_retryable());

        let err = Error::from(api_error(500, "InternalError"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_raw_kube_errors_still_answer_predicates() {
        assert!(Error::from(api_error(404, "NotFound")).is_not_found());
        assert!(Error::from(api_error(409, "AlreadyExists")).is_already_exists());
    }

    #[test]
    fn test_validation_error_lists_fields() {
        let errors = ValidationErrors::from(vec![
            FieldError::new("name", "name is a required field"),
            FieldError::new("image", "image is a required field"),
        ]);
        let err = Error::from(errors);
        assert_eq!(
            err.to_string(),
            "validation error: name is a required field, image is a required field"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_input_type_is_not_retryable() {
        let err = Error::invalid_input_type("database.kuberly.io/v1alpha1/Valkey", "v1/ConfigMap");
        assert!(err.to_string().contains("v1/ConfigMap"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_internal_error_with_context() {
        let err = Error::internal_with_context("reconciler", "unexpected state");
        assert!(err.is_retryable());
        assert_eq!(err.context(), Some("reconciler"));
        assert!(err.to_string().contains("[reconciler]"));
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));
    }

    #[test]
    fn test_serialization_errors_convert() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::from(json_err);
        assert!(matches!(err, Error::Serialization { kind: None, .. }));
        assert!(!err.is_retryable());

        let err = Error::serialization_for_kind("Valkey", "missing field `spec`");
        match &err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("Valkey")),
            _ => panic!("Expected Serialization variant"),
        }
    }
}
