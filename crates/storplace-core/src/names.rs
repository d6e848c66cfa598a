use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Minimum length of an object name
pub const NAME_MIN_LENGTH: usize = 2;
/// Maximum length of an object name
pub const NAME_MAX_LENGTH: usize = 48;

/// Validate an object name (node, storage pool or resource)
pub fn is_valid_name(name: &str) -> bool {
    if name.len() < NAME_MIN_LENGTH || name.len() > NAME_MAX_LENGTH {
        return false;
    }

    // Must start with a letter, then letters, digits, '_' or '-'
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Defines a validated, case-insensitive object name.
///
/// The spelling given by the user is kept for display, while equality,
/// ordering and hashing use the upper-cased value.
macro_rules! object_name {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name {
            display: String,
            value: String,
        }

        impl $name {
            /// Create a new name, validating it
            pub fn new(name: impl Into<String>) -> Result<Self> {
                let display = name.into();
                if !is_valid_name(&display) {
                    return Err(CoreError::invalid_name($kind, display));
                }
                let value = display.to_ascii_uppercase();
                Ok(Self { display, value })
            }

            /// The name as it was spelled on creation
            pub fn as_str(&self) -> &str {
                &self.display
            }

            /// The upper-cased identity of the name
            pub fn value(&self) -> &str {
                &self.value
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.value == other.value
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.value.hash(state);
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                self.value.cmp(&other.value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.display)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(s: String) -> Result<Self> {
                Self::new(s)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = CoreError;

            fn try_from(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> Self {
                name.display
            }
        }
    };
}

object_name!(
    /// Name of a cluster node
    NodeName,
    "node"
);

object_name!(
    /// Name of a storage pool (shared by all pools of one storage pool definition)
    StorPoolName,
    "storage pool"
);

object_name!(
    /// Name of a resource definition
    ResourceName,
    "resource"
);
