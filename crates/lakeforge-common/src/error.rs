//! Error types for lakeforge
//!
//! Errors are structured with fields to aid debugging. Every variant carries
//! enough context (resource names, the command that failed, the release being
//! installed) to be rendered directly into a blocker message.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for lakeforge operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// An external command (helm, aws, eksctl) failed
    #[error("command `{program}` failed: {message}")]
    Command {
        /// Program that was executed
        program: String,
        /// Captured stderr or spawn error
        message: String,
        /// Whether a retry could succeed (non-zero exit vs. missing binary)
        retryable: bool,
    },

    /// Cloud provisioning error
    #[error("provisioning error for {resource}: {message}")]
    Provision {
        /// Resource being provisioned (cluster, bucket, queue, policy)
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// Release manager error
    #[error("release error [{namespace}/{release}]: {message}")]
    Release {
        /// Release name
        release: String,
        /// Release namespace
        namespace: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid input or resource payload
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "storage.bucket")
        field: Option<String>,
    },

    /// Configuration file could not be loaded
    #[error("configuration error: {message}")]
    Config {
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

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "probe", "poller")
        context: String,
    },
}

impl Error {
    /// Create a command error for a non-zero exit
    pub fn command(program: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a command error that retrying cannot fix (binary missing, bad args)
    pub fn command_permanent(program: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a provisioning error for the given resource
    pub fn provision(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provision {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a release error
    pub fn release(
        release: impl Into<String>,
        namespace: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Release {
            release: release.into(),
            namespace: namespace.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
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

    /// Check if this error is retryable
    ///
    /// Kubernetes and command failures are transient; validation and
    /// configuration errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { .. } => true,
            Error::Command { retryable, .. } => *retryable,
            Error::Provision { .. } => true,
            Error::Release { .. } => true,
            Error::Validation { .. } => false,
            Error::Config { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::config(e.to_string())
    }
}
