use crate::filter::{FilterPredicate, PoolFilterContext};
use crate::score::ScoreFunction;
use crate::types::Candidate;
use crate::{Result, SchedulerError};
use std::collections::BTreeMap;
use storplace_core::{
    AccessContext, AccessPolicy, AccessType, ClusterSnapshot, SecuredObject, StorPoolName,
};
use tracing::{debug, trace};

/// Candidates grouped by storage pool name, each group ordered by node name
pub type CandidateGroups = BTreeMap<StorPoolName, Vec<Candidate>>;

/// Collects the scored storage pools a subject may place on
pub struct CandidatePoolBuilder<'a> {
    snapshot: &'a ClusterSnapshot,
    policy: &'a dyn AccessPolicy,
    access: &'a AccessContext,
    filters: &'a [Box<dyn FilterPredicate>],
    scorer: &'a dyn ScoreFunction,
}

impl<'a> CandidatePoolBuilder<'a> {
    pub fn new(
        snapshot: &'a ClusterSnapshot,
        policy: &'a dyn AccessPolicy,
        access: &'a AccessContext,
        filters: &'a [Box<dyn FilterPredicate>],
        scorer: &'a dyn ScoreFunction,
    ) -> Self {
        Self {
            snapshot,
            policy,
            access,
            filters,
            scorer,
        }
    }

    /// Run every predicate on every storage pool and score the survivors
    pub fn build(&self, size_kib: u64) -> Result<CandidateGroups> {
        let context = PoolFilterContext {
            snapshot: self.snapshot,
            policy: self.policy,
            access: self.access,
            size_kib,
        };

        let mut groups = CandidateGroups::new();
        let mut total = 0;

        for pool_name in self.snapshot.storage_pool_names() {
            self.policy
                .require_access(
                    self.access,
                    &SecuredObject::StorPoolDefinition(pool_name),
                    AccessType::View,
                )
                .map_err(|e| SchedulerError::access_denied("list storage pools", e))?;

            let mut candidates = Vec::new();

            'pools: for pool in self.snapshot.storage_pools(pool_name) {
                for filter in self.filters {
                    let result = filter.filter(&context, pool)?;
                    if !result.passed {
                        debug!(
                            "{} filtered out by {}: {}",
                            result.storage_pool,
                            filter.name(),
                            result.reason.unwrap_or_default()
                        );
                        continue 'pools;
                    }
                }

                let score = self.scorer.score(pool);
                trace!("{} scored {} by {}", pool, score, self.scorer.name());
                if !score.is_finite() {
                    return Err(SchedulerError::internal_error(format!(
                        "{} scored {} by {}, scores must be finite",
                        pool,
                        score,
                        self.scorer.name()
                    )));
                }
                candidates.push(Candidate::new(pool, score));
            }

            if !candidates.is_empty() {
                total += candidates.len();
                groups.insert(pool_name.clone(), candidates);
            }
        }

        debug!(
            "Built {} candidates in {} storage pool groups",
            total,
            groups.len()
        );
        Ok(groups)
    }
}
