use crate::builder::CandidateGroups;
use crate::types::{Candidate, ConstraintSet, PropertyFilter};
use crate::{Result, SchedulerError};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;
use storplace_core::{ClusterSnapshot, ResourceName};
use tracing::debug;

/// Compile a not-place-with pattern: case-insensitive, `.` matches newlines
pub fn compile_resource_regex(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| SchedulerError::invalid_regex(pattern, e))
}

/// Removes candidates violating the non-combinatorial constraints
///
/// Applied in order: forced pool name, not-place-with exclusion (per node,
/// falling back to per pool), then pinned same-property values.
pub struct ConstraintFilter<'a> {
    snapshot: &'a ClusterSnapshot,
    constraints: &'a ConstraintSet,
    regex: Option<Regex>,
}

impl<'a> ConstraintFilter<'a> {
    /// Validate the constraint configuration; no candidate work happens here
    pub fn new(snapshot: &'a ClusterSnapshot, constraints: &'a ConstraintSet) -> Result<Self> {
        for filter in constraints
            .replicas_on_same
            .iter()
            .chain(&constraints.replicas_on_different)
        {
            filter.validate()?;
        }

        let regex = constraints
            .not_place_with_regex
            .as_deref()
            .map(compile_resource_regex)
            .transpose()?;

        Ok(Self {
            snapshot,
            constraints,
            regex,
        })
    }

    /// Resource names no new replica may be placed next to
    pub fn excluded_resources(&self) -> BTreeSet<ResourceName> {
        let mut excluded: BTreeSet<ResourceName> =
            self.constraints.not_place_with.iter().cloned().collect();

        if let Some(regex) = &self.regex {
            excluded.extend(
                self.snapshot
                    .resource_names()
                    .filter(|name| regex.is_match(name.as_str()))
                    .cloned(),
            );
        }

        excluded
    }

    /// Flatten the groups into the search input, dropping every violating candidate
    pub fn apply(&self, groups: CandidateGroups) -> Vec<Candidate> {
        let candidates: Vec<Candidate> = groups
            .into_iter()
            .filter(|(pool_name, _)| {
                self.constraints
                    .forced_storage_pool
                    .as_ref()
                    .is_none_or(|forced| forced == pool_name)
            })
            .flat_map(|(_, group)| group)
            .collect();
        debug!("{} candidates after storage pool filter", candidates.len());

        let mut candidates = self.exclude_not_place_with(candidates);

        let pinned: Vec<&PropertyFilter> = self
            .constraints
            .replicas_on_same
            .iter()
            .filter(|filter| filter.pinned_value.is_some())
            .collect();
        if !pinned.is_empty() {
            candidates.retain(|candidate| self.matches_pinned(candidate, &pinned));
            debug!(
                "{} candidates after pinned property filter",
                candidates.len()
            );
        }

        candidates
    }

    /// Drop candidates on nodes hosting an excluded resource; if that leaves
    /// nothing, only drop the storage pools hosting one
    fn exclude_not_place_with(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let excluded = self.excluded_resources();
        if excluded.is_empty() {
            return candidates;
        }
        debug!("Not placing next to resources: {:?}", excluded);

        let node_level: Vec<Candidate> = candidates
            .iter()
            .filter(|candidate| {
                !self
                    .snapshot
                    .resources_on_node(&candidate.node)
                    .any(|rsc| excluded.contains(rsc))
            })
            .cloned()
            .collect();
        if !node_level.is_empty() {
            debug!("{} candidates after node exclusion", node_level.len());
            return node_level;
        }

        let pool_level: Vec<Candidate> = candidates
            .into_iter()
            .filter(|candidate| {
                !self
                    .snapshot
                    .resources_in_storage_pool(&candidate.node, &candidate.storage_pool)
                    .any(|rsc| excluded.contains(rsc))
            })
            .collect();
        debug!(
            "Node exclusion left no candidates, {} remain after storage pool exclusion",
            pool_level.len()
        );
        pool_level
    }

    fn matches_pinned(&self, candidate: &Candidate, pinned: &[&PropertyFilter]) -> bool {
        let node = self.snapshot.node(&candidate.node);
        pinned.iter().all(|filter| {
            let value = node.and_then(|n| n.prop(&filter.key));
            let matches = value == filter.pinned_value.as_deref();
            if !matches {
                debug!(
                    "{} dropped: property '{}' is {:?}, required {:?}",
                    candidate, filter.key, value, filter.pinned_value
                );
            }
            matches
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storplace_core::{Node, NodeName, ProviderKind, Resource, StorPool, StorPoolName};

    fn node(n: &str) -> NodeName {
        NodeName::new(n).unwrap()
    }

    fn sp(name: &str, n: &str) -> StorPool {
        StorPool::new(StorPoolName::new(name).unwrap(), node(n), ProviderKind::Lvm)
    }

    fn rsc(name: &str) -> ResourceName {
        ResourceName::new(name).unwrap()
    }

    /// alpha: fast + slow, hosts "db" in slow; bravo: fast, hosts "web"
    fn snapshot() -> ClusterSnapshot {
        ClusterSnapshot::builder()
            .node(Node::new(node("alpha")).with_prop("zone", "a"))
            .node(Node::new(node("bravo")).with_prop("zone", "b"))
            .storage_pool(sp("fast", "alpha"))
            .storage_pool(sp("slow", "alpha"))
            .storage_pool(sp("fast", "bravo"))
            .resource(
                Resource::new(rsc("db"), node("alpha"))
                    .with_volume(StorPoolName::new("slow").unwrap(), 1),
            )
            .resource(
                Resource::new(rsc("web"), node("bravo"))
                    .with_volume(StorPoolName::new("fast").unwrap(), 1),
            )
            .resource_definition(rsc("Web-Cache"))
            .build()
            .unwrap()
    }

    fn groups(snapshot: &ClusterSnapshot) -> CandidateGroups {
        let mut groups = CandidateGroups::new();
        for name in snapshot.storage_pool_names() {
            let group = snapshot
                .storage_pools(name)
                .map(|pool| Candidate::new(pool, 1.0))
                .collect();
            groups.insert(name.clone(), group);
        }
        groups
    }

    fn placed(candidates: &[Candidate]) -> Vec<String> {
        candidates
            .iter()
            .map(|c| format!("{}@{}", c.storage_pool, c.node))
            .collect()
    }

    #[test]
    fn test_forced_storage_pool() {
        let snapshot = snapshot();
        let constraints = ConstraintSet::new(1).with_storage_pool(StorPoolName::new("SLOW").unwrap());
        let filter = ConstraintFilter::new(&snapshot, &constraints).unwrap();

        let result = filter.apply(groups(&snapshot));
        assert_eq!(placed(&result), vec!["slow@alpha"]);
    }

    #[test]
    fn test_pinned_same_property() {
        let snapshot = snapshot();
        let constraints = ConstraintSet::new(1)
            .with_replicas_on_same(PropertyFilter::pinned("zone", "b"))
            .with_replicas_on_same(PropertyFilter::key("rack"));
        let filter = ConstraintFilter::new(&snapshot, &constraints).unwrap();

        let result = filter.apply(groups(&snapshot));
        assert_eq!(placed(&result), vec!["fast@bravo"]);
    }

    #[test]
    fn test_node_level_exclusion() {
        let snapshot = snapshot();
        let constraints = ConstraintSet::new(1).with_not_place_with(rsc("DB"));
        let filter = ConstraintFilter::new(&snapshot, &constraints).unwrap();

        let result = filter.apply(groups(&snapshot));
        assert_eq!(placed(&result), vec!["fast@bravo"]);
    }

    #[test]
    fn test_pool_level_fallback() {
        let snapshot = snapshot();
        let constraints = ConstraintSet::new(1)
            .with_not_place_with(rsc("db"))
            .with_not_place_with(rsc("web"));
        let filter = ConstraintFilter::new(&snapshot, &constraints).unwrap();

        // Every node hosts an excluded resource; only pools without one survive
        let result = filter.apply(groups(&snapshot));
        assert_eq!(placed(&result), vec!["fast@alpha"]);
    }

    #[test]
    fn test_regex_extends_excluded_set() {
        let snapshot = snapshot();
        let constraints = ConstraintSet::new(1).with_not_place_with_regex("^WEB");
        let filter = ConstraintFilter::new(&snapshot, &constraints).unwrap();

        let excluded: Vec<_> = filter
            .excluded_resources()
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(excluded, vec!["web", "Web-Cache"]);

        let result = filter.apply(groups(&snapshot));
        assert_eq!(placed(&result), vec!["fast@alpha", "slow@alpha"]);
    }

    #[test]
    fn test_regex_find_semantics() {
        let snapshot = snapshot();
        let constraints = ConstraintSet::new(1).with_not_place_with_regex("cache");
        let filter = ConstraintFilter::new(&snapshot, &constraints).unwrap();

        let excluded: Vec<_> = filter
            .excluded_resources()
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(excluded, vec!["Web-Cache"]);
    }

    #[test]
    fn test_not_place_with_runs_before_pinned_property() {
        let snapshot = snapshot();
        let constraints = ConstraintSet::new(1)
            .with_replicas_on_same(PropertyFilter::pinned("zone", "a"))
            .with_not_place_with(rsc("db"));
        let filter = ConstraintFilter::new(&snapshot, &constraints).unwrap();

        // bravo survives the node exclusion, so no pool-level fallback puts
        // a replica next to "db" on alpha; the pin then rejects bravo
        let result = filter.apply(groups(&snapshot));
        assert!(result.is_empty());
    }

    #[test]
    fn test_invalid_property_filter() {
        let snapshot = snapshot();
        for constraints in [
            ConstraintSet::new(1).with_replicas_on_same(PropertyFilter::key("")),
            ConstraintSet::new(1).with_replicas_on_different(PropertyFilter::pinned("", "a")),
            ConstraintSet::new(1).with_replicas_on_same(PropertyFilter::key("zone=a")),
        ] {
            assert!(matches!(
                ConstraintFilter::new(&snapshot, &constraints),
                Err(SchedulerError::InvalidPropertyFilter { .. })
            ));
        }
    }

    #[test]
    fn test_invalid_regex() {
        let snapshot = snapshot();
        let constraints = ConstraintSet::new(1).with_not_place_with_regex("db(");
        assert!(matches!(
            ConstraintFilter::new(&snapshot, &constraints),
            Err(SchedulerError::InvalidRegex { .. })
        ));
    }
}
