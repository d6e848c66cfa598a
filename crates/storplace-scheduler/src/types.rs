use crate::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use storplace_core::{NodeName, ProviderKind, ResourceName, StorPool, StorPoolName};

/// A node property constraint, optionally pinned to one value
///
/// Parsed once from `key` or `key=value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropertyFilter {
    pub key: String,
    pub pinned_value: Option<String>,
}

impl PropertyFilter {
    /// Unpinned filter on `key`
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            pinned_value: None,
        }
    }

    /// Filter on `key` pinned to `value`
    pub fn pinned(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            pinned_value: Some(value.into()),
        }
    }

    pub fn parse(expr: &str) -> Result<Self> {
        let (key, pinned_value) = match expr.split_once('=') {
            Some((key, value)) => (key, Some(value.to_string())),
            None => (expr, None),
        };

        let filter = Self {
            key: key.to_string(),
            pinned_value,
        };
        filter.validate()?;
        Ok(filter)
    }

    /// The key must be non-empty and free of `=`
    ///
    /// Filters built through [`PropertyFilter::key`], [`PropertyFilter::pinned`]
    /// or the public fields are only checked here.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() || self.key.contains('=') {
            return Err(SchedulerError::invalid_property_filter(self.to_string()));
        }
        Ok(())
    }
}

impl FromStr for PropertyFilter {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PropertyFilter {
    type Error = SchedulerError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<PropertyFilter> for String {
    fn from(filter: PropertyFilter) -> Self {
        filter.to_string()
    }
}

impl fmt::Display for PropertyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pinned_value {
            Some(value) => write!(f, "{}={}", self.key, value),
            None => f.write_str(&self.key),
        }
    }
}

/// Caller-supplied placement constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintSet {
    /// Number of storage pools to select (2 unless given)
    pub replica_count: usize,
    /// Only pools with exactly this name are eligible
    pub forced_storage_pool: Option<StorPoolName>,
    /// Do not place next to any of these resources
    pub not_place_with: Vec<ResourceName>,
    /// Extends `not_place_with` with every registered resource name matching this pattern
    pub not_place_with_regex: Option<String>,
    /// Selected nodes must agree on these properties
    pub replicas_on_same: Vec<PropertyFilter>,
    /// Selected nodes must pairwise differ on these properties
    pub replicas_on_different: Vec<PropertyFilter>,
    /// Ignore nodes already hosting the resource
    pub skip_already_placed: bool,
    /// Required free space per pool in KiB
    pub size_kib: u64,
}

impl Default for ConstraintSet {
    fn default() -> Self {
        Self {
            replica_count: 2,
            forced_storage_pool: None,
            not_place_with: Vec::new(),
            not_place_with_regex: None,
            replicas_on_same: Vec::new(),
            replicas_on_different: Vec::new(),
            skip_already_placed: false,
            size_kib: 0,
        }
    }
}

impl ConstraintSet {
    pub fn new(replica_count: usize) -> Self {
        Self {
            replica_count,
            ..Default::default()
        }
    }

    pub fn with_storage_pool(mut self, name: StorPoolName) -> Self {
        self.forced_storage_pool = Some(name);
        self
    }

    pub fn with_not_place_with(mut self, name: ResourceName) -> Self {
        self.not_place_with.push(name);
        self
    }

    pub fn with_not_place_with_regex(mut self, pattern: impl Into<String>) -> Self {
        self.not_place_with_regex = Some(pattern.into());
        self
    }

    pub fn with_replicas_on_same(mut self, filter: PropertyFilter) -> Self {
        self.replicas_on_same.push(filter);
        self
    }

    pub fn with_replicas_on_different(mut self, filter: PropertyFilter) -> Self {
        self.replicas_on_different.push(filter);
        self
    }

    pub fn with_skip_already_placed(mut self, skip: bool) -> Self {
        self.skip_already_placed = skip;
        self
    }

    pub fn with_size_kib(mut self, size_kib: u64) -> Self {
        self.size_kib = size_kib;
        self
    }
}

/// One admissible (storage pool, node) pair with its score
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub storage_pool: StorPoolName,
    pub node: NodeName,
    pub provider_kind: ProviderKind,
    /// Higher is better
    pub score: f64,
    pub free_space_kib: Option<u64>,
}

impl Candidate {
    pub fn new(pool: &StorPool, score: f64) -> Self {
        Self {
            storage_pool: pool.name.clone(),
            node: pool.node.clone(),
            provider_kind: pool.provider_kind,
            score,
            free_space_kib: pool.free_space_kib,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "storage pool '{}' on node '{}' (score {})",
            self.storage_pool, self.node, self.score
        )
    }
}

/// Existing deployment of the resource being placed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementContext {
    /// Nodes already hosting a replica, diskless ones included
    pub deployed_nodes: BTreeSet<NodeName>,
    /// Provider kind shared by the existing diskful volumes
    pub locked_provider_kind: Option<ProviderKind>,
}

/// One chosen storage pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedPool {
    pub node: NodeName,
    pub storage_pool: StorPoolName,
    pub provider_kind: ProviderKind,
    pub score: f64,
    pub free_space_kib: Option<u64>,
}

impl From<Candidate> for SelectedPool {
    fn from(candidate: Candidate) -> Self {
        Self {
            node: candidate.node,
            storage_pool: candidate.storage_pool,
            provider_kind: candidate.provider_kind,
            score: candidate.score,
            free_space_kib: candidate.free_space_kib,
        }
    }
}

/// Result of a successful placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub resource: ResourceName,
    /// Chosen pools in descending score order
    pub pools: Vec<SelectedPool>,
    pub total_score: f64,
    /// Every chosen pool is thin-provisioned
    pub all_thin: bool,
    /// Smallest free space among chosen pools, unknown counted as 0
    pub min_free_space_kib: u64,
}

impl Placement {
    pub fn new(resource: ResourceName, selection: Vec<Candidate>) -> Self {
        let pools: Vec<SelectedPool> = selection.into_iter().map(SelectedPool::from).collect();
        let total_score: f64 = pools.iter().map(|sp| sp.score).sum();
        let all_thin = pools
            .iter()
            .all(|sp| sp.provider_kind.uses_thin_provisioning());
        let min_free_space_kib = pools
            .iter()
            .map(|sp| sp.free_space_kib.unwrap_or(0))
            .min()
            .unwrap_or(0);

        Self {
            resource,
            pools,
            total_score,
            all_thin,
            min_free_space_kib,
        }
    }

    /// Nodes of the chosen pools, in selection order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeName> {
        self.pools.iter().map(|sp| &sp.node)
    }
}

/// Result of running a predicate on a storage pool
#[derive(Debug, Clone)]
pub struct FilterResult {
    /// Storage pool description
    pub storage_pool: String,
    /// Whether the pool passed the filter
    pub passed: bool,
    /// Reason for failure (if any)
    pub reason: Option<String>,
}

impl FilterResult {
    /// Create a passing filter result
    pub fn pass(storage_pool: String) -> Self {
        Self {
            storage_pool,
            passed: true,
            reason: None,
        }
    }

    /// Create a failing filter result
    pub fn fail(storage_pool: String, reason: String) -> Self {
        Self {
            storage_pool,
            passed: false,
            reason: Some(reason),
        }
    }
}
