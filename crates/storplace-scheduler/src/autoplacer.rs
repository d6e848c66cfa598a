use crate::builder::CandidatePoolBuilder;
use crate::constraint::ConstraintFilter;
use crate::filter::{default_filters, FilterPredicate};
use crate::score::{ScoreFunction, ScoreStrategy};
use crate::selector::Selector;
use crate::types::{ConstraintSet, Placement, PlacementContext};
use crate::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use storplace_core::{
    AccessContext, AccessPolicy, AccessType, ClusterSnapshot, CoreError, ProviderKind,
    ResourceName, SecuredObject,
};
use storplace_storage::RegistryStore;
use tracing::{debug, info, warn};

/// Configuration for the autoplacer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoplacerConfig {
    /// Scoring strategy for candidate pools
    pub strategy: ScoreStrategy,
    /// Log every sorted candidate before the search
    pub log_candidates: bool,
}

impl AutoplacerConfig {
    /// Load from a JSON or YAML file (chosen by extension, YAML otherwise)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::io_error(
                format!("Failed to read config '{}': {}", path.display(), e),
                Some(Box::new(e)),
            )
        })?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => storplace_core::from_json(&content)?,
            _ => storplace_core::from_yaml(&content)?,
        };
        Ok(config)
    }
}

/// Automatic replica placement
///
/// Runs the candidate pool builder, the constraint filter and the selection
/// engine over one immutable snapshot. The autoplacer holds no mutable
/// state, so one instance may serve concurrent placements.
pub struct Autoplacer {
    policy: Arc<dyn AccessPolicy>,
    config: AutoplacerConfig,
    filters: Vec<Box<dyn FilterPredicate>>,
    scorer: Box<dyn ScoreFunction>,
}

impl Autoplacer {
    /// Create a new autoplacer using the configured scoring strategy
    pub fn new(policy: Arc<dyn AccessPolicy>, config: AutoplacerConfig) -> Self {
        let scorer = config.strategy.score_function();
        Self {
            policy,
            config,
            filters: default_filters(),
            scorer,
        }
    }

    /// Replace the scoring function
    pub fn with_score_function(mut self, scorer: Box<dyn ScoreFunction>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &AutoplacerConfig {
        &self.config
    }

    /// Choose storage pools for new replicas of `resource`
    ///
    /// Returns `Ok(None)` when no feasible placement exists.
    pub fn place(
        &self,
        snapshot: &ClusterSnapshot,
        access: &AccessContext,
        resource: &ResourceName,
        constraints: &ConstraintSet,
    ) -> Result<Option<Placement>> {
        debug!(
            "Placing {} replicas of resource '{}' as '{}'",
            constraints.replica_count,
            resource,
            access.subject()
        );

        // Configuration errors surface before any candidate work
        let constraint_filter = ConstraintFilter::new(snapshot, constraints)?;

        let context = placement_context(snapshot, resource)?;
        if !context.deployed_nodes.is_empty() {
            debug!(
                "Resource '{}' already deployed on {:?} (provider kind {:?})",
                resource, context.deployed_nodes, context.locked_provider_kind
            );
        }
        self.check_deployed_node_access(access, constraints, &context)?;

        let builder = CandidatePoolBuilder::new(
            snapshot,
            self.policy.as_ref(),
            access,
            &self.filters,
            self.scorer.as_ref(),
        );
        let groups = builder.build(constraints.size_kib)?;
        let candidates = constraint_filter.apply(groups);

        let selection = Selector::new(snapshot, constraints, &context)
            .with_candidate_logging(self.config.log_candidates)
            .select(candidates)?;

        match selection {
            Some(selection) => {
                let placement = Placement::new(resource.clone(), selection);
                info!(
                    "Placed resource '{}' on {} with total score {}",
                    resource,
                    placement
                        .pools
                        .iter()
                        .map(|sp| format!("{}@{}", sp.storage_pool, sp.node))
                        .collect::<Vec<_>>()
                        .join(", "),
                    placement.total_score
                );
                Ok(Some(placement))
            }
            None => {
                warn!(
                    "No feasible placement of {} replicas for resource '{}'",
                    constraints.replica_count, resource
                );
                Ok(None)
            }
        }
    }

    /// Place against the registry's current content, read as one snapshot
    pub fn place_from_registry(
        &self,
        registry: &RegistryStore,
        access: &AccessContext,
        resource: &ResourceName,
        constraints: &ConstraintSet,
    ) -> Result<Option<Placement>> {
        let snapshot = registry.load_snapshot()?;
        self.place(&snapshot, access, resource, constraints)
    }

    /// Existing replicas' node properties seed the property constraints
    fn check_deployed_node_access(
        &self,
        access: &AccessContext,
        constraints: &ConstraintSet,
        context: &PlacementContext,
    ) -> Result<()> {
        let reads_props =
            !constraints.replicas_on_same.is_empty() || !constraints.replicas_on_different.is_empty();
        if constraints.skip_already_placed || !reads_props {
            return Ok(());
        }

        for node in &context.deployed_nodes {
            self.policy
                .require_access(access, &SecuredObject::Node(node), AccessType::View)
                .map_err(|e| SchedulerError::access_denied("read node properties", e))?;
        }
        Ok(())
    }
}

/// Derive the existing deployment of `resource`
///
/// Every node with a replica counts as deployed, diskless ones included. The
/// diskful volumes must agree on one provider kind, which then locks the
/// placement.
pub fn placement_context(
    snapshot: &ClusterSnapshot,
    resource: &ResourceName,
) -> Result<PlacementContext> {
    let mut context = PlacementContext::default();

    for replica in snapshot.replicas(resource) {
        context.deployed_nodes.insert(replica.node.clone());
        if replica.diskless {
            continue;
        }

        for vlm in &replica.volumes {
            let pool = snapshot
                .storage_pool(&replica.node, &vlm.storage_pool)
                .ok_or_else(|| {
                    SchedulerError::internal_error(format!(
                        "Volume {} of {} refers to unknown storage pool '{}'",
                        vlm.number, replica, vlm.storage_pool
                    ))
                })?;
            if pool.provider_kind.is_diskless() {
                continue;
            }
            lock_provider_kind(&mut context, resource, pool.provider_kind)?;
        }
    }

    Ok(context)
}

fn lock_provider_kind(
    context: &mut PlacementContext,
    resource: &ResourceName,
    kind: ProviderKind,
) -> Result<()> {
    match context.locked_provider_kind {
        None => {
            context.locked_provider_kind = Some(kind);
            Ok(())
        }
        Some(locked) if locked == kind => Ok(()),
        Some(locked) => Err(SchedulerError::provider_kind_conflict(
            resource.as_str(),
            locked,
            kind,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::Uniform;
    use crate::types::PropertyFilter;
    use std::io::Write;
    use storplace_core::{AllowAll, Node, NodeName, Resource, StaticAcl, StorPool, StorPoolName};
    use tempfile::tempdir;

    fn node(n: &str) -> NodeName {
        NodeName::new(n).unwrap()
    }

    fn pool(name: &str) -> StorPoolName {
        StorPoolName::new(name).unwrap()
    }

    fn rsc(name: &str) -> ResourceName {
        ResourceName::new(name).unwrap()
    }

    /// Three zoned nodes with an LVM pool each plus a ZFS pool on gamma;
    /// "db" is already deployed on alpha and diskless on beta
    fn snapshot() -> ClusterSnapshot {
        ClusterSnapshot::builder()
            .node(Node::new(node("alpha")).with_prop("zone", "a"))
            .node(Node::new(node("beta")).with_prop("zone", "b"))
            .node(Node::new(node("gamma")).with_prop("zone", "c"))
            .node(Node::new(node("delta")).with_prop("zone", "a"))
            .storage_pool(
                StorPool::new(pool("lvm"), node("alpha"), ProviderKind::Lvm).with_free_space(100),
            )
            .storage_pool(
                StorPool::new(pool("lvm"), node("beta"), ProviderKind::Lvm).with_free_space(300),
            )
            .storage_pool(
                StorPool::new(pool("lvm"), node("gamma"), ProviderKind::Lvm).with_free_space(200),
            )
            .storage_pool(
                StorPool::new(pool("lvm"), node("delta"), ProviderKind::Lvm).with_free_space(400),
            )
            .storage_pool(
                StorPool::new(pool("zfs"), node("gamma"), ProviderKind::Zfs).with_free_space(900),
            )
            .storage_pool(StorPool::new(
                pool("diskless"),
                node("beta"),
                ProviderKind::Diskless,
            ))
            .resource(Resource::new(rsc("db"), node("alpha")).with_volume(pool("lvm"), 10))
            .resource(
                Resource::new(rsc("db"), node("beta"))
                    .with_volume(pool("diskless"), 10)
                    .diskless(),
            )
            .build()
            .unwrap()
    }

    fn autoplacer() -> Autoplacer {
        Autoplacer::new(Arc::new(AllowAll), AutoplacerConfig::default())
    }

    fn nodes(placement: &Placement) -> Vec<String> {
        placement.nodes().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_placement_context() {
        let snapshot = snapshot();
        let context = placement_context(&snapshot, &rsc("db")).unwrap();

        let deployed: Vec<_> = context.deployed_nodes.iter().map(|n| n.to_string()).collect();
        assert_eq!(deployed, vec!["alpha", "beta"]);
        assert_eq!(context.locked_provider_kind, Some(ProviderKind::Lvm));

        let fresh = placement_context(&snapshot, &rsc("fresh")).unwrap();
        assert!(fresh.deployed_nodes.is_empty());
        assert_eq!(fresh.locked_provider_kind, None);
    }

    #[test]
    fn test_placement_context_provider_kind_conflict() {
        let snapshot = ClusterSnapshot::builder()
            .node(Node::new(node("alpha")))
            .node(Node::new(node("beta")))
            .storage_pool(StorPool::new(pool("lvm"), node("alpha"), ProviderKind::Lvm))
            .storage_pool(StorPool::new(pool("zfs"), node("beta"), ProviderKind::Zfs))
            .resource(Resource::new(rsc("db"), node("alpha")).with_volume(pool("lvm"), 1))
            .resource(Resource::new(rsc("db"), node("beta")).with_volume(pool("zfs"), 1))
            .build()
            .unwrap();

        let err = placement_context(&snapshot, &rsc("db")).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::ProviderKindConflict {
                first: ProviderKind::Lvm,
                second: ProviderKind::Zfs,
                ..
            }
        ));
    }

    #[test]
    fn test_place_new_resource() {
        let snapshot = snapshot();
        let placement = autoplacer()
            .place(
                &snapshot,
                &AccessContext::new("alice"),
                &rsc("web"),
                &ConstraintSet::new(2),
            )
            .unwrap()
            .unwrap();

        // zfs@gamma scores highest but no second ZFS pool exists
        assert_eq!(placement.pools.len(), 2);
        assert_eq!(nodes(&placement), vec!["delta", "beta"]);
        assert_eq!(placement.total_score, 700.0);
        assert!(!placement.all_thin);
        assert_eq!(placement.min_free_space_kib, 300);
    }

    #[test]
    fn test_place_existing_resource() {
        let snapshot = snapshot();
        let placement = autoplacer()
            .place(
                &snapshot,
                &AccessContext::new("alice"),
                &rsc("db"),
                &ConstraintSet::new(1),
            )
            .unwrap()
            .unwrap();

        // alpha and beta are taken, the LVM lock rules out zfs@gamma
        assert_eq!(nodes(&placement), vec!["delta"]);
        assert_eq!(placement.pools[0].provider_kind, ProviderKind::Lvm);
    }

    #[test]
    fn test_place_infeasible() {
        let snapshot = snapshot();
        let constraints = ConstraintSet::new(2)
            .with_replicas_on_different(PropertyFilter::key("zone"))
            .with_storage_pool(pool("lvm"));

        // Zones a and b are claimed by the existing replicas
        let result = autoplacer()
            .place(&snapshot, &AccessContext::new("alice"), &rsc("db"), &constraints)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_place_reports_invalid_regex_first() {
        let snapshot = snapshot();
        let acl = StaticAcl::new(None);
        let autoplacer = Autoplacer::new(Arc::new(acl), AutoplacerConfig::default());
        let constraints = ConstraintSet::new(1).with_not_place_with_regex("[");

        let err = autoplacer
            .place(&snapshot, &AccessContext::new("alice"), &rsc("web"), &constraints)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRegex { .. }));
    }

    #[test]
    fn test_place_rejects_empty_property_key() {
        let snapshot = snapshot();
        let constraints = ConstraintSet::new(1).with_replicas_on_same(PropertyFilter::key(""));

        let err = autoplacer()
            .place(&snapshot, &AccessContext::new("alice"), &rsc("web"), &constraints)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidPropertyFilter { .. }));
    }

    #[test]
    fn test_place_denied_reading_deployed_node() {
        let snapshot = snapshot();
        let alpha = node("alpha");
        let acl = StaticAcl::new(Some(AccessType::Use)).grant(
            "alice",
            SecuredObject::Node(&alpha),
            None,
        );
        let autoplacer = Autoplacer::new(Arc::new(acl), AutoplacerConfig::default());
        let constraints =
            ConstraintSet::new(1).with_replicas_on_same(PropertyFilter::key("zone"));

        let err = autoplacer
            .place(&snapshot, &AccessContext::new("alice"), &rsc("db"), &constraints)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::AccessDenied { .. }));

        // Skipping the existing deployment skips reading its properties
        let constraints = constraints.with_skip_already_placed(true);
        assert!(autoplacer
            .place(&snapshot, &AccessContext::new("alice"), &rsc("db"), &constraints)
            .is_ok());
    }

    #[test]
    fn test_place_with_custom_score_function() {
        let snapshot = snapshot();
        let placement = autoplacer()
            .with_score_function(Box::new(Uniform))
            .place(
                &snapshot,
                &AccessContext::new("alice"),
                &rsc("web"),
                &ConstraintSet::new(3),
            )
            .unwrap()
            .unwrap();

        // Equal scores keep pool-name then node-name order
        assert_eq!(nodes(&placement), vec!["alpha", "beta", "delta"]);
        assert_eq!(placement.total_score, 3.0);
    }

    #[test]
    fn test_place_from_registry() {
        let dir = tempdir().unwrap();
        let registry = RegistryStore::open(dir.path().join("registry.redb")).unwrap();
        registry.save_snapshot(&snapshot()).unwrap();

        let placement = autoplacer()
            .place_from_registry(
                &registry,
                &AccessContext::system(),
                &rsc("db"),
                &ConstraintSet::new(1),
            )
            .unwrap()
            .unwrap();
        assert_eq!(nodes(&placement), vec!["delta"]);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "strategy: least-used\nlog_candidates: true").unwrap();

        let config = AutoplacerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.strategy, ScoreStrategy::LeastUsed);
        assert!(config.log_candidates);

        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, "{{}}").unwrap();
        assert_eq!(
            AutoplacerConfig::from_file(file.path()).unwrap(),
            AutoplacerConfig::default()
        );
    }
}
