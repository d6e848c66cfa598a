// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for cluster model operations
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// Name does not satisfy the naming rules
    #[error("Invalid {kind} name: '{name}'")]
    #[diagnostic(
        code(storplace::invalid_name),
        help("Names must be 2-48 characters long, start with a letter and contain only letters, digits, '_' or '-'")
    )]
    InvalidName {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        name: String,
    },

    /// Node not found
    #[error("Node not found: {node}")]
    #[diagnostic(
        code(storplace::node_not_found),
        help("Register the node in the cluster snapshot before referencing it")
    )]
    NodeNotFound {
        #[allow(unused)]
        node: String,
    },

    /// Storage pool not found
    #[error("Storage pool '{storage_pool}' not found on node '{node}'")]
    #[diagnostic(
        code(storplace::storage_pool_not_found),
        help("Volumes can only reference storage pools of the node hosting the resource")
    )]
    StorPoolNotFound {
        #[allow(unused)]
        node: String,
        #[allow(unused)]
        storage_pool: String,
    },

    /// Snapshot is internally inconsistent
    #[error("Invalid cluster snapshot: {reason}")]
    #[diagnostic(
        code(storplace::invalid_snapshot),
        help("{suggestion}")
    )]
    InvalidSnapshot {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Size value could not be parsed
    #[error("Invalid size: '{value}'")]
    #[diagnostic(
        code(storplace::invalid_size),
        help("Use a plain KiB number or a suffixed value such as 512Mi, 10Gi or 1Ti")
    )]
    InvalidSize {
        #[allow(unused)]
        value: String,
    },

    /// Access control list entry is malformed
    #[error("Invalid grant for subject '{subject}': {reason}")]
    #[diagnostic(
        code(storplace::invalid_acl),
        help("Each grant names a node, a storage pool definition, or both for a single storage pool")
    )]
    InvalidAcl {
        #[allow(unused)]
        subject: String,
        #[allow(unused)]
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(storplace::serialization_error),
        help("Ensure the snapshot format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O error while reading a snapshot file
    #[error("I/O error: {message}")]
    #[diagnostic(
        code(storplace::io_error),
        help("Check that the file exists and is readable")
    )]
    IoError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an InvalidName error
    pub fn invalid_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::InvalidName {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a NodeNotFound error
    pub fn node_not_found(node: impl Into<String>) -> Self {
        Self::NodeNotFound { node: node.into() }
    }

    /// Create a StorPoolNotFound error
    pub fn stor_pool_not_found(node: impl Into<String>, storage_pool: impl Into<String>) -> Self {
        Self::StorPoolNotFound {
            node: node.into(),
            storage_pool: storage_pool.into(),
        }
    }

    /// Create an InvalidSnapshot error
    pub fn invalid_snapshot(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an InvalidSize error
    pub fn invalid_size(value: impl Into<String>) -> Self {
        Self::InvalidSize {
            value: value.into(),
        }
    }

    /// Create an InvalidAcl error
    pub fn invalid_acl(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAcl {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an IoError
    pub fn io_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::IoError {
            message: message.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CoreError::node_not_found("alpha");
        assert!(matches!(err, CoreError::NodeNotFound { .. }));

        let err = CoreError::invalid_snapshot(
            "volume references unknown pool",
            "Add the storage pool to the snapshot",
        );
        assert!(matches!(err, CoreError::InvalidSnapshot { .. }));
        assert!(err.to_string().contains("unknown pool"));
    }
}
