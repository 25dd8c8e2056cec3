//! Request validation
//!
//! A [`Validator`] is built once at startup and handed to whatever needs it,
//! instead of living in process-global state. Failures are collected into a
//! [`ValidationErrors`] list so callers see every bad field at once.

use std::fmt;

use kube::ResourceExt;
use regex::Regex;
use serde::Serialize;

use crate::crd::{InstanceRef, Valkey};
use crate::Error;

/// Storage quantity pattern, e.g. `512Mi`, `10Gi`, `1Ti`
pub const STORAGE_PATTERN: &str = r"^[0-9]+[MGT]i$";

/// Memory quantity pattern, e.g. `256Mi`, `1Gi`
pub const MEMORY_PATTERN: &str = r"^[0-9]+[KMG]i$";

/// CPU quantity pattern, e.g. `200m`, `2`
pub const CPU_PATTERN: &str = r"^[0-9]+m?$";

/// Upper bound on the replica count accepted by the schema
pub const MAX_REPLICAS: i32 = 5;

/// A single invalid field
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Field name as it appears in the request (e.g. `crd_name`)
    pub field: String,
    /// Human-readable description
    pub message: String,
}

impl FieldError {
    /// Create a field error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Ordered list of field errors
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a field error
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    /// True when nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of recorded errors
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the recorded errors
    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// Names of every failing field, in order
    pub fn fields(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.field.as_str()).collect()
    }

    /// `Ok(())` when empty, otherwise an [`Error::Validation`]
    pub fn into_result(self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation { errors: self })
        }
    }
}

impl From<Vec<FieldError>> for ValidationErrors {
    fn from(errors: Vec<FieldError>) -> Self {
        Self(errors)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.0.iter().map(|e| e.message.as_str()).collect();
        f.write_str(&messages.join(", "))
    }
}

/// Which quantity grammar a string must follow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantityKind {
    /// Persistent storage size
    Storage,
    /// Container memory
    Memory,
    /// Container CPU
    Cpu,
}

/// Compiled validation rules
///
/// Cheap to share behind an `Arc`; construction compiles the quantity
/// patterns once.
#[derive(Debug, Clone)]
pub struct Validator {
    storage: Regex,
    memory: Regex,
    cpu: Regex,
}

impl Validator {
    /// Build a ready-to-use validator
    pub fn new() -> Self {
        // Patterns are compile-time constants covered by tests
        Self {
            storage: Regex::new(STORAGE_PATTERN).expect("storage pattern is valid"),
            memory: Regex::new(MEMORY_PATTERN).expect("memory pattern is valid"),
            cpu: Regex::new(CPU_PATTERN).expect("cpu pattern is valid"),
        }
    }

    /// Record an error if `value` is empty
    pub fn require(&self, errors: &mut ValidationErrors, field: &str, value: &str) {
        if value.trim().is_empty() {
            errors.push(field, format!("{field} is a required field"));
        }
    }

    /// Record an error if `value` falls outside `0..=MAX_REPLICAS`
    pub fn replicas(&self, errors: &mut ValidationErrors, field: &str, value: i32) {
        if !(0..=MAX_REPLICAS).contains(&value) {
            errors.push(
                field,
                format!("{field} must be between 0 and {MAX_REPLICAS}, got {value}"),
            );
        }
    }

    /// Record an error if `value` does not match the grammar for `kind`
    pub fn quantity(
        &self,
        errors: &mut ValidationErrors,
        field: &str,
        value: &str,
        kind: QuantityKind,
    ) {
        let (pattern, example) = match kind {
            QuantityKind::Storage => (&self.storage, "512Mi"),
            QuantityKind::Memory => (&self.memory, "512Mi"),
            QuantityKind::Cpu => (&self.cpu, "200m"),
        };
        if !pattern.is_match(value) {
            errors.push(
                field,
                format!(
                    "{field} must match {} (e.g. {example}), got '{value}'",
                    pattern.as_str()
                ),
            );
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// Implemented by every request type that crosses a service boundary
pub trait Validate {
    /// Check the request, returning [`Error::Validation`] listing every bad field
    fn validate(&self, validator: &Validator) -> Result<(), Error>;
}

impl Validate for InstanceRef {
    fn validate(&self, validator: &Validator) -> Result<(), Error> {
        let mut errors = ValidationErrors::new();
        validator.require(&mut errors, "name", &self.name);
        validator.require(&mut errors, "namespace", &self.namespace);
        errors.into_result()
    }
}

impl Validate for Valkey {
    fn validate(&self, validator: &Validator) -> Result<(), Error> {
        let mut errors = ValidationErrors::new();
        let namespace = self.namespace().unwrap_or_default();
        validator.require(&mut errors, "metadata.name", &self.name_any());
        validator.require(&mut errors, "metadata.namespace", &namespace);

        let spec = &self.spec;
        validator.require(&mut errors, "spec.image", &spec.image);
        validator.require(&mut errors, "spec.user", &spec.user);
        validator.require(&mut errors, "spec.password", &spec.password);
        validator.replicas(&mut errors, "spec.replicas", spec.replicas);
        validator.quantity(
            &mut errors,
            "spec.resource.cpu",
            &spec.resource.cpu,
            QuantityKind::Cpu,
        );
        validator.quantity(
            &mut errors,
            "spec.resource.memory",
            &spec.resource.memory,
            QuantityKind::Memory,
        );
        if spec.volume.enabled {
            validator.quantity(
                &mut errors,
                "spec.resource.storage",
                &spec.resource.storage,
                QuantityKind::Storage,
            );
            validator.quantity(
                &mut errors,
                "spec.volume.storage",
                &spec.volume.storage,
                QuantityKind::Storage,
            );
        }
        errors.into_result()
    }
}
