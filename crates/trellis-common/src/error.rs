//! Error types for the Trellis reconciliation engine
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries contextual information such as the exposure rule
//! name, the resource kind being processed, and the underlying cause.
//! Nothing is swallowed: a failed pass surfaces the error and relies on
//! the external work queue to re-run it from scratch.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Trellis operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Backend service or pod-selector lookup failure
    #[error("lookup error for {rule}: {message}")]
    Lookup {
        /// Name of the exposure rule whose backend could not be resolved
        rule: String,
        /// Description of what could not be resolved
        message: String,
    },

    /// A stored JSON blob failed to parse
    #[error("decode error: {message}")]
    Decode {
        /// Description of what failed
        message: String,
        /// What was being decoded (e.g., "jwt config", "stored v1beta1 spec")
        what: Option<String>,
    },

    /// Validation error for ExposureRule specs
    #[error("validation error for {rule}: {message}")]
    Validation {
        /// Name of the exposure rule with invalid configuration
        rule: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.rules[0].path")
        field: Option<String>,
    },

    /// Cross-version conversion error
    #[error("conversion error: {message}")]
    Conversion {
        /// Description of what failed
        message: String,
        /// The destination API version (if known)
        version: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "diff", "migration")
        context: String,
    },
}

impl Error {
    /// Create a lookup error with exposure rule context
    pub fn lookup_for(rule: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Lookup {
            rule: rule.into(),
            message: msg.into(),
        }
    }

    /// Create a decode error with the given message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
            what: None,
        }
    }

    /// Create a decode error recording what was being decoded
    pub fn decode_of(what: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
            what: Some(what.into()),
        }
    }

    /// Create a validation error with the given message
    ///
    /// For simple validation errors without exposure rule context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            rule: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with exposure rule context
    pub fn validation_for(rule: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            rule: rule.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with exposure rule context and field path
    pub fn validation_for_field(
        rule: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            rule: rule.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a conversion error with the given message
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion {
            message: msg.into(),
            version: None,
        }
    }

    /// Create a conversion error with destination version context
    pub fn conversion_to(version: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Conversion {
            message: msg.into(),
            version: Some(version.into()),
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

    /// Check if this error is retryable
    ///
    /// Validation, decode and conversion errors are not retryable (they
    /// require a spec fix). Lookup errors are retryable since the backend
    /// service may appear later. Kubernetes errors depend on the status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry on transient K8s errors (connection, timeout).
                // Don't retry on 4xx errors (validation, not found, etc.)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Lookup { .. } => true,
            Error::Decode { .. } => false,
            Error::Validation { .. } => false,
            Error::Conversion { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the exposure rule name if this error is associated with one
    pub fn rule(&self) -> Option<&str> {
        match self {
            Error::Lookup { rule, .. } => Some(rule),
            Error::Validation { rule, .. } => Some(rule),
            _ => None,
        }
    }
}
