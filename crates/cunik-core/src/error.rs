//! Error types for cunik-core.

use crate::InstanceId;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cunik-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while resolving configuration or managing instances.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad, missing or extra launch parameter
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Image or data volume unknown to its registry
    #[error("cannot find {kind} {name} in registry")]
    UnknownResource {
        /// Which registry missed
        kind: ResourceKind,
        /// Symbolic name that was looked up
        name: String,
    },

    /// Instance not found
    #[error("instance not found: {0}")]
    NotFound(InstanceId),

    /// Malformed JSON file
    #[error("{} is not a valid JSON object: {source}", path.display())]
    Format {
        /// File that failed to parse
        path: PathBuf,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },

    /// Missing or unreadable file
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Error from the VM backend
    #[error("VM error: {0}")]
    Backend(#[from] cunik_vm::VmError),

    /// Tap device provisioning failed
    #[error("network provisioning failed: {0}")]
    Network(String),
}

impl CoreError {
    /// Coarse classification of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::UnknownResource { .. } | Self::NotFound(_) => ErrorKind::NotFound,
            Self::Format { .. } => ErrorKind::Format,
            Self::Io { .. } => ErrorKind::Io,
            Self::Backend(_) | Self::Network(_) => ErrorKind::Backend,
        }
    }
}

/// Coarse error classes exposed to callers of the lifecycle API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid launch parameters
    Config,
    /// Image, volume or instance lookup miss
    NotFound,
    /// Malformed JSON
    Format,
    /// Missing template or parameter file
    Io,
    /// VM or network provisioning failure
    Backend,
}

/// Registry a symbolic name is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Image registry
    Image,
    /// Data-volume registry
    Volume,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Volume => write!(f, "data volume"),
        }
    }
}

/// Launch parameter validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Key outside the allowed set
    #[error("{0} is an invalid keyword argument")]
    UnexpectedKey(String),

    /// Required key not supplied
    #[error("{0} is a required keyword argument but has not been set")]
    MissingKey(String),

    /// Value has the wrong JSON type
    #[error("{key} must be {expected}")]
    InvalidValue {
        /// Offending key
        key: String,
        /// What the key should hold
        expected: &'static str,
    },

    /// Memory value is not an integer
    #[error("memory size must be an integer, got {0}")]
    InvalidMemory(String),

    /// Memory value is zero or negative
    #[error("memory size must be a positive integer, got {0}")]
    NonPositiveMemory(i64),

    /// Hypervisor tag no backend knows
    #[error("unknown hypervisor: {0}")]
    UnknownHypervisor(String),

    /// Template placeholder without a value
    #[error("params in cmdline not filled: {0}")]
    MissingPlaceholder(String),

    /// `ipv4_addr` is not a dotted IPv4 address
    #[error("invalid ipv4_addr: {0}")]
    InvalidAddress(String),

    /// Image defaults try to set a key the manager derives itself
    #[error("{0} is derived per instance and cannot be set in config.json")]
    ReservedKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_offender() {
        let err = CoreError::from(ConfigError::UnexpectedKey("colour".into()));
        assert!(err.to_string().contains("colour"));

        let err = CoreError::UnknownResource {
            kind: ResourceKind::Image,
            name: "nginx".into(),
        };
        assert_eq!(err.to_string(), "cannot find image nginx in registry");

        let err = CoreError::UnknownResource {
            kind: ResourceKind::Volume,
            name: "db".into(),
        };
        assert_eq!(err.to_string(), "cannot find data volume db in registry");
    }

    #[test]
    fn test_kind() {
        assert_eq!(
            CoreError::from(ConfigError::MissingKey("name".into())).kind(),
            ErrorKind::Config
        );
        assert_eq!(
            CoreError::NotFound(InstanceId::new()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CoreError::Network("ip failed".into()).kind(),
            ErrorKind::Backend
        );
        assert_eq!(
            CoreError::from(cunik_vm::VmError::Start("boom".into())).kind(),
            ErrorKind::Backend
        );
    }
}
