//! Access-control collaborator interfaces.
//!
//! The access context is an explicit value handed to every call that needs
//! an authorization decision. Policies decide how much access a subject has
//! on a secured object; the scheduler only consumes those decisions.

use crate::names::{NodeName, StorPoolName};
use crate::CoreError;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Subject identity used for privileged internal operations
pub const SYSTEM_SUBJECT: &str = "SYSTEM";

/// Identity on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessContext {
    subject: String,
}

impl AccessContext {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }

    /// The privileged system context
    pub fn system() -> Self {
        Self::new(SYSTEM_SUBJECT)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_system(&self) -> bool {
        self.subject == SYSTEM_SUBJECT
    }
}

/// Access levels, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    View,
    Use,
    Change,
    Control,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessType::View => "VIEW",
            AccessType::Use => "USE",
            AccessType::Change => "CHANGE",
            AccessType::Control => "CONTROL",
        };
        f.write_str(s)
    }
}

/// Object protected by an access policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecuredObject<'a> {
    /// All storage pools sharing one name
    StorPoolDefinition(&'a StorPoolName),
    Node(&'a NodeName),
    StorPool {
        node: &'a NodeName,
        name: &'a StorPoolName,
    },
}

impl SecuredObject<'_> {
    /// Owned key identifying this object
    pub fn key(&self) -> ObjectKey {
        match self {
            SecuredObject::StorPoolDefinition(name) => {
                ObjectKey::StorPoolDefinition((*name).clone())
            }
            SecuredObject::Node(name) => ObjectKey::Node((*name).clone()),
            SecuredObject::StorPool { node, name } => ObjectKey::StorPool {
                node: (*node).clone(),
                name: (*name).clone(),
            },
        }
    }
}

impl fmt::Display for SecuredObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecuredObject::StorPoolDefinition(name) => {
                write!(f, "storage pool definition '{}'", name)
            }
            SecuredObject::Node(name) => write!(f, "node '{}'", name),
            SecuredObject::StorPool { node, name } => {
                write!(f, "storage pool '{}' on node '{}'", name, node)
            }
        }
    }
}

/// Owned counterpart of [`SecuredObject`], usable as a map key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    StorPoolDefinition(StorPoolName),
    Node(NodeName),
    StorPool { node: NodeName, name: StorPoolName },
}

/// An access policy refused the requested access
#[derive(Error, Debug, Clone, Diagnostic)]
#[error("Subject '{subject}' lacks {requested} access on {object}")]
#[diagnostic(
    code(storplace::access_denied),
    help("Grant the subject at least {requested} access, or run the operation with a privileged context")
)]
pub struct AccessDenied {
    pub subject: String,
    pub object: String,
    pub requested: AccessType,
    pub granted: Option<AccessType>,
}

/// Decides which access level a subject has on an object
pub trait AccessPolicy: Send + Sync {
    /// Access granted to the context's subject, `None` for no access at all
    fn query_access(&self, ctx: &AccessContext, object: &SecuredObject<'_>) -> Option<AccessType>;

    /// Whether the granted access covers the requested level
    fn has_access(
        &self,
        ctx: &AccessContext,
        object: &SecuredObject<'_>,
        requested: AccessType,
    ) -> bool {
        self.query_access(ctx, object)
            .is_some_and(|granted| granted >= requested)
    }

    /// Fail with [`AccessDenied`] unless the requested level is granted
    fn require_access(
        &self,
        ctx: &AccessContext,
        object: &SecuredObject<'_>,
        requested: AccessType,
    ) -> Result<(), AccessDenied> {
        let granted = self.query_access(ctx, object);
        if granted.is_some_and(|g| g >= requested) {
            Ok(())
        } else {
            Err(AccessDenied {
                subject: ctx.subject().to_string(),
                object: object.to_string(),
                requested,
                granted,
            })
        }
    }
}

/// Policy granting full access to everyone
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn query_access(&self, _ctx: &AccessContext, _object: &SecuredObject<'_>) -> Option<AccessType> {
        Some(AccessType::Control)
    }
}

/// Table of explicit grants with a fallback level.
///
/// The system context always has full access.
#[derive(Debug, Clone, Default)]
pub struct StaticAcl {
    default: Option<AccessType>,
    grants: HashMap<(String, ObjectKey), Option<AccessType>>,
}

impl StaticAcl {
    /// Create an ACL where unlisted objects get `default`
    pub fn new(default: Option<AccessType>) -> Self {
        Self {
            default,
            grants: HashMap::new(),
        }
    }

    /// Set the access of a subject on an object (`None` revokes all access)
    pub fn grant(
        mut self,
        subject: impl Into<String>,
        object: SecuredObject<'_>,
        access: Option<AccessType>,
    ) -> Self {
        self.grants.insert((subject.into(), object.key()), access);
        self
    }
}

/// One entry of an [`AclConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclGrant {
    pub subject: String,
    /// A node, or with `storage_pool` the node of one storage pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeName>,
    /// A storage pool definition, or with `node` one storage pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_pool: Option<StorPoolName>,
    /// Missing means no access at all
    #[serde(default)]
    pub access: Option<AccessType>,
}

impl AclGrant {
    fn object_key(&self) -> crate::Result<ObjectKey> {
        match (&self.node, &self.storage_pool) {
            (Some(node), Some(name)) => Ok(ObjectKey::StorPool {
                node: node.clone(),
                name: name.clone(),
            }),
            (Some(node), None) => Ok(ObjectKey::Node(node.clone())),
            (None, Some(name)) => Ok(ObjectKey::StorPoolDefinition(name.clone())),
            (None, None) => Err(CoreError::invalid_acl(
                self.subject.as_str(),
                "the grant names no node and no storage pool",
            )),
        }
    }
}

/// Serialized form of a [`StaticAcl`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Access on objects without an explicit grant
    pub default: Option<AccessType>,
    pub grants: Vec<AclGrant>,
}

impl TryFrom<AclConfig> for StaticAcl {
    type Error = CoreError;

    fn try_from(config: AclConfig) -> crate::Result<Self> {
        let mut acl = StaticAcl::new(config.default);
        for grant in &config.grants {
            acl.grants
                .insert((grant.subject.clone(), grant.object_key()?), grant.access);
        }
        Ok(acl)
    }
}

impl StaticAcl {
    /// Load from a JSON or YAML file (chosen by extension, YAML otherwise)
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::io_error(
                format!("Failed to read access control list '{}': {}", path.display(), e),
                Some(Box::new(e)),
            )
        })?;

        let config: AclConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => crate::from_json(&content)?,
            _ => crate::from_yaml(&content)?,
        };
        Self::try_from(config)
    }
}

impl AccessPolicy for StaticAcl {
    fn query_access(&self, ctx: &AccessContext, object: &SecuredObject<'_>) -> Option<AccessType> {
        if ctx.is_system() {
            return Some(AccessType::Control);
        }
        self.grants
            .get(&(ctx.subject().to_string(), object.key()))
            .copied()
            .unwrap_or(self.default)
    }
}
