// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use storplace_core::{AccessDenied, ProviderKind};
use thiserror::Error;

/// Scheduler error type
///
/// Infeasibility is not an error: it is reported as an absent placement.
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// An access policy refused an access the placement depends on
    #[error("Access denied while trying to {action}: {source}")]
    #[diagnostic(
        code(scheduler::access_denied),
        help("Grant the subject the required access or run the placement with a privileged context")
    )]
    AccessDenied {
        action: String,
        #[source]
        source: AccessDenied,
    },

    /// The not-place-with regex does not compile
    #[error("Invalid resource name pattern '{pattern}': {source}")]
    #[diagnostic(
        code(scheduler::invalid_regex),
        help("Fix the --not-place-with-regex pattern; it uses Rust regex syntax")
    )]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A replicas-on-same/different entry is malformed
    #[error("Invalid property filter '{expr}'")]
    #[diagnostic(
        code(scheduler::invalid_property_filter),
        help("Property filters have the form 'key' or 'key=value' with a non-empty key")
    )]
    InvalidPropertyFilter {
        expr: String,
    },

    /// Existing replicas of a resource use different provider kinds
    #[error("Resource {resource} is deployed with provider kinds {first} and {second}")]
    #[diagnostic(
        code(scheduler::provider_kind_conflict),
        help("The registry is inconsistent; a resource's diskful volumes must share one provider kind")
    )]
    ProviderKindConflict {
        resource: String,
        first: ProviderKind,
        second: ProviderKind,
    },

    /// Storage error
    #[error("Storage error: {0}")]
    #[diagnostic(
        code(scheduler::storage_error),
        help("Check the underlying storage system")
    )]
    Storage(#[from] storplace_storage::StorageError),

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(scheduler::core_error),
        help("Check the cluster snapshot and the supplied names")
    )]
    Core(#[from] storplace_core::CoreError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    Internal {
        message: String,
    },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create an AccessDenied error
    pub fn access_denied(action: impl Into<String>, source: AccessDenied) -> Self {
        Self::AccessDenied {
            action: action.into(),
            source,
        }
    }

    /// Create an InvalidRegex error
    pub fn invalid_regex(pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::InvalidRegex {
            pattern: pattern.into(),
            source,
        }
    }

    /// Create an InvalidPropertyFilter error
    pub fn invalid_property_filter(expr: impl Into<String>) -> Self {
        Self::InvalidPropertyFilter { expr: expr.into() }
    }

    /// Create a ProviderKindConflict error
    pub fn provider_kind_conflict(
        resource: impl Into<String>,
        first: ProviderKind,
        second: ProviderKind,
    ) -> Self {
        Self::ProviderKindConflict {
            resource: resource.into(),
            first,
            second,
        }
    }

    /// Create an Internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
