//! Error types for Strata
//!
//! Errors carry the resource they concern so a failed run can be traced back
//! to the node that broke the dependency chain. None of these are retried by
//! the core; retry and backoff belong to the caller or the engine.

use thiserror::Error;

use crate::template::TemplateError;

/// Main error type for Strata operations
#[derive(Debug, Error)]
pub enum Error {
    /// A feature intentionally not supported in the current environment
    #[error("unimplemented: {feature} is not supported in {environment} environments")]
    Unimplemented {
        /// The feature that was requested
        feature: String,
        /// The environment it was requested in (e.g. "managed")
        environment: String,
    },

    /// A template failed to parse or render
    #[error("template render error in {template}: {source}")]
    TemplateRender {
        /// Name of the template
        template: String,
        /// The underlying template error
        #[source]
        source: TemplateError,
    },

    /// A template rendered but produced nothing usable
    #[error("template {template} produced no usable output: {reason}")]
    TemplateOutputInvalid {
        /// Name of the template
        template: String,
        /// Why the output was rejected
        reason: String,
    },

    /// A node was issued (or reported) before one of its predecessors
    #[error("dependency violation for {resource} (predecessor {predecessor}): {message}")]
    DependencyViolation {
        /// The dependent resource
        resource: String,
        /// The predecessor that was not satisfied
        predecessor: String,
        /// What went wrong
        message: String,
    },

    /// The orchestration engine rejected an operation
    #[error("engine error for {resource}: {message}")]
    Engine {
        /// The resource the engine was operating on
        resource: String,
        /// The engine's message, verbatim
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Construction-time validation failure
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// The resource or value being validated
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g. "sentinel.resources.limits.cpu")
        field: Option<String>,
    },

    /// Certificate generation or parsing failure
    #[error("certificate error: {message}")]
    Certificate {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Stack configuration could not be loaded
    #[error("configuration error [{path}]: {message}")]
    Config {
        /// Path of the configuration file
        path: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create an unimplemented-path error
    pub fn unimplemented(feature: impl Into<String>, environment: impl Into<String>) -> Self {
        Self::Unimplemented {
            feature: feature.into(),
            environment: environment.into(),
        }
    }

    /// Create a template-output-invalid error
    pub fn template_output_invalid(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TemplateOutputInvalid {
            template: template.into(),
            reason: reason.into(),
        }
    }

    /// Create a dependency violation error
    pub fn dependency_violation(
        resource: impl Into<String>,
        predecessor: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::DependencyViolation {
            resource: resource.into(),
            predecessor: predecessor.into(),
            message: msg.into(),
        }
    }

    /// Create an engine error for a resource
    pub fn engine_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Engine {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a certificate error
    pub fn certificate(msg: impl Into<String>) -> Self {
        Self::Certificate {
            message: msg.into(),
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error
    pub fn config(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Whether this is the "not supported here" error rather than a real failure
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, Error::Unimplemented { .. })
    }

    /// Whether this error came from the orchestration engine boundary
    pub fn is_engine_failure(&self) -> bool {
        matches!(self, Error::Engine { .. } | Error::Kube { .. })
    }

    /// Get the resource this error concerns, if any
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::DependencyViolation { resource, .. } => Some(resource),
            Error::Engine { resource, .. } => Some(resource),
            Error::Validation { resource, .. } => Some(resource),
            _ => None,
        }
    }
}
