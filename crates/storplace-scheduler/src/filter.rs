use crate::types::FilterResult;
use crate::{Result, SchedulerError};
use storplace_core::{
    AccessContext, AccessPolicy, AccessType, ClusterSnapshot, SecuredObject, StorPool,
};
use tracing::debug;

/// Everything a pool predicate may consult
pub struct PoolFilterContext<'a> {
    pub snapshot: &'a ClusterSnapshot,
    pub policy: &'a dyn AccessPolicy,
    pub access: &'a AccessContext,
    /// Required free space in KiB
    pub size_kib: u64,
}

/// Filter predicate trait
///
/// A failing result excludes the pool; an error aborts the whole placement.
pub trait FilterPredicate: Send + Sync {
    /// Filter a storage pool
    fn filter(&self, context: &PoolFilterContext<'_>, pool: &StorPool) -> Result<FilterResult>;

    /// Name of the filter
    fn name(&self) -> &str;
}

/// Subject may use both the storage pool definition and the node
pub struct HasAccess;

impl FilterPredicate for HasAccess {
    fn filter(&self, context: &PoolFilterContext<'_>, pool: &StorPool) -> Result<FilterResult> {
        let definition = SecuredObject::StorPoolDefinition(&pool.name);
        if !context
            .policy
            .has_access(context.access, &definition, AccessType::Use)
        {
            return Ok(FilterResult::fail(
                pool.to_string(),
                format!("No {} access on {}", AccessType::Use, definition),
            ));
        }

        let node = SecuredObject::Node(&pool.node);
        if !context
            .policy
            .has_access(context.access, &node, AccessType::Use)
        {
            return Ok(FilterResult::fail(
                pool.to_string(),
                format!("No {} access on {}", AccessType::Use, node),
            ));
        }

        Ok(FilterResult::pass(pool.to_string()))
    }

    fn name(&self) -> &str {
        "HasAccess"
    }
}

/// Diskless pools cannot hold data
pub struct NotDiskless;

impl FilterPredicate for NotDiskless {
    fn filter(&self, _context: &PoolFilterContext<'_>, pool: &StorPool) -> Result<FilterResult> {
        if pool.provider_kind.is_diskless() {
            return Ok(FilterResult::fail(
                pool.to_string(),
                "Storage pool is diskless".to_string(),
            ));
        }
        Ok(FilterResult::pass(pool.to_string()))
    }

    fn name(&self) -> &str {
        "NotDiskless"
    }
}

/// The controller must be connected to the pool's node
pub struct NodeConnected;

impl FilterPredicate for NodeConnected {
    fn filter(&self, context: &PoolFilterContext<'_>, pool: &StorPool) -> Result<FilterResult> {
        let node = context.snapshot.node(&pool.node).ok_or_else(|| {
            SchedulerError::internal_error(format!("{} refers to an unknown node", pool))
        })?;

        if !node.connected {
            return Ok(FilterResult::fail(
                pool.to_string(),
                format!("Node '{}' is not connected", node.name),
            ));
        }
        Ok(FilterResult::pass(pool.to_string()))
    }

    fn name(&self) -> &str {
        "NodeConnected"
    }
}

/// Thick pools need the requested free space; thin pools are exempt
pub struct HasFreeSpace;

impl FilterPredicate for HasFreeSpace {
    fn filter(&self, context: &PoolFilterContext<'_>, pool: &StorPool) -> Result<FilterResult> {
        if pool.provider_kind.uses_thin_provisioning() {
            return Ok(FilterResult::pass(pool.to_string()));
        }

        let object = SecuredObject::StorPool {
            node: &pool.node,
            name: &pool.name,
        };
        context
            .policy
            .require_access(context.access, &object, AccessType::View)
            .map_err(|e| SchedulerError::access_denied("query free space", e))?;

        // Unknown estimates count as empty
        let free = pool.free_space_kib.unwrap_or(0);
        if free < context.size_kib {
            return Ok(FilterResult::fail(
                pool.to_string(),
                format!(
                    "Insufficient free space: requested {} KiB, available {} KiB",
                    context.size_kib, free
                ),
            ));
        }

        debug!("{} has {} KiB free", pool, free);
        Ok(FilterResult::pass(pool.to_string()))
    }

    fn name(&self) -> &str {
        "HasFreeSpace"
    }
}

/// Get the default set of filters, in evaluation order
pub fn default_filters() -> Vec<Box<dyn FilterPredicate>> {
    vec![
        Box::new(HasAccess),
        Box::new(NotDiskless),
        Box::new(NodeConnected),
        Box::new(HasFreeSpace),
    ]
}
