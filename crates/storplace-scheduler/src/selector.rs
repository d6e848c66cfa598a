//! Selection engine: branch-and-bound search over scored candidates.
//!
//! Candidates are sorted by descending score and searched depth-first in
//! index order. Each search attempt starts at an increasing offset; the
//! first complete selection of an attempt is compared against the best one
//! so far, and the search stops as soon as the sum of the next
//! `replica_count` scores cannot beat it. Equal totals keep the selection
//! found first.
//!
//! The depth-first search runs on an explicit frame stack. Every frame
//! records exactly which bookkeeping entries it added, so backtracking
//! undoes one selection without rebuilding the state.

use crate::types::{Candidate, ConstraintSet, PlacementContext, PropertyFilter};
use crate::{Result, SchedulerError};
use std::collections::BTreeSet;
use storplace_core::{ClusterSnapshot, NodeName, ProviderKind};
use tracing::{debug, trace};

/// Property values of a node, indexed like the constraint keys
#[derive(Debug)]
struct NodeProps {
    same: Vec<Option<String>>,
    different: Vec<Option<String>>,
}

/// Bookkeeping added by one selected candidate
#[derive(Debug)]
struct Frame {
    idx: usize,
    /// Same-property keys this candidate pinned
    pinned: Vec<usize>,
    /// Different-property keys this candidate claimed a value for
    claimed: Vec<usize>,
    /// Whether this candidate set the provider kind lock
    locked: bool,
}

/// Selection state shared by all frames of one search attempt
#[derive(Debug, Clone)]
struct SearchState {
    used_nodes: BTreeSet<NodeName>,
    provider_lock: Option<ProviderKind>,
    same_pins: Vec<Option<String>>,
    diff_claims: Vec<Vec<String>>,
}

impl SearchState {
    /// Why `candidate` cannot join the current selection, if it cannot
    fn rejection(
        &self,
        candidate: &Candidate,
        props: &NodeProps,
        keys: &Keys<'_>,
    ) -> Option<String> {
        if self.used_nodes.contains(&candidate.node) {
            return Some(format!("node '{}' is already used", candidate.node));
        }

        if let Some(lock) = self.provider_lock {
            if candidate.provider_kind != lock {
                return Some(format!(
                    "provider kind {} does not match selected {}",
                    candidate.provider_kind, lock
                ));
            }
        }

        for (k, pin) in self.same_pins.iter().enumerate() {
            if let Some(required) = pin {
                if props.same[k].as_ref() != Some(required) {
                    return Some(format!(
                        "property '{}' is {:?} but the selection requires '{}'",
                        keys.same[k].key, props.same[k], required
                    ));
                }
            }
        }

        for (k, claimed) in self.diff_claims.iter().enumerate() {
            if let Some(value) = &props.different[k] {
                if claimed.contains(value) {
                    return Some(format!(
                        "property '{}' value '{}' is already taken",
                        keys.different[k].key, value
                    ));
                }
            }
        }

        None
    }

    fn apply(&mut self, idx: usize, candidate: &Candidate, props: &NodeProps) -> Frame {
        self.used_nodes.insert(candidate.node.clone());

        let locked = self.provider_lock.is_none();
        if locked {
            self.provider_lock = Some(candidate.provider_kind);
        }

        let mut pinned = Vec::new();
        for (k, pin) in self.same_pins.iter_mut().enumerate() {
            if pin.is_none() {
                if let Some(value) = &props.same[k] {
                    *pin = Some(value.clone());
                    pinned.push(k);
                }
            }
        }

        let mut claimed = Vec::new();
        for (k, values) in self.diff_claims.iter_mut().enumerate() {
            if let Some(value) = &props.different[k] {
                values.push(value.clone());
                claimed.push(k);
            }
        }

        Frame {
            idx,
            pinned,
            claimed,
            locked,
        }
    }

    fn undo(&mut self, frame: &Frame, candidate: &Candidate) {
        self.used_nodes.remove(&candidate.node);
        if frame.locked {
            self.provider_lock = None;
        }
        for &k in &frame.pinned {
            self.same_pins[k] = None;
        }
        for &k in &frame.claimed {
            self.diff_claims[k].pop();
        }
    }
}

struct Keys<'a> {
    same: &'a [PropertyFilter],
    different: &'a [PropertyFilter],
}

/// Picks the best-scoring feasible set of candidates
pub struct Selector<'a> {
    snapshot: &'a ClusterSnapshot,
    constraints: &'a ConstraintSet,
    context: &'a PlacementContext,
    log_candidates: bool,
}

impl<'a> Selector<'a> {
    pub fn new(
        snapshot: &'a ClusterSnapshot,
        constraints: &'a ConstraintSet,
        context: &'a PlacementContext,
    ) -> Self {
        Self {
            snapshot,
            constraints,
            context,
            log_candidates: false,
        }
    }

    /// Log every sorted candidate before searching
    pub fn with_candidate_logging(mut self, enabled: bool) -> Self {
        self.log_candidates = enabled;
        self
    }

    /// Select `replica_count` of the candidates
    ///
    /// Returns `None` when no feasible selection exists. A replica count of
    /// zero yields an empty selection.
    pub fn select(&self, mut candidates: Vec<Candidate>) -> Result<Option<Vec<Candidate>>> {
        let replica_count = self.constraints.replica_count;
        if replica_count == 0 {
            return Ok(Some(Vec::new()));
        }

        // Stable: equal scores keep the builder's pool/node order
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        if self.log_candidates {
            for candidate in &candidates {
                debug!("Sorted candidate: {}", candidate);
            }
        }

        if candidates.len() < replica_count {
            debug!(
                "Only {} candidates for {} replicas",
                candidates.len(),
                replica_count
            );
            return Ok(None);
        }

        let keys = Keys {
            same: &self.constraints.replicas_on_same,
            different: &self.constraints.replicas_on_different,
        };
        let props = candidates
            .iter()
            .map(|c| self.node_props(&c.node, &keys))
            .collect::<Result<Vec<_>>>()?;
        let initial = self.initial_state(&keys)?;

        let mut best: Option<Vec<usize>> = None;
        let mut best_score = f64::NEG_INFINITY;
        let mut start = 0;

        while let Some(selection) =
            find_selection(&candidates, &props, &keys, &initial, start, replica_count)
        {
            let score: f64 = selection.iter().map(|&i| candidates[i].score).sum();
            if score > best_score {
                debug!(
                    "Found selection with score {}: {}",
                    score,
                    describe(&candidates, &selection)
                );
                best = Some(selection);
                best_score = score;
            } else {
                trace!(
                    "Skipping selection with score {} (best {}): {}",
                    score,
                    best_score,
                    describe(&candidates, &selection)
                );
            }

            start += 1;
            if start + replica_count > candidates.len() {
                trace!("Not enough remaining candidates, search finished");
                break;
            }

            let bound: f64 = candidates[start..start + replica_count]
                .iter()
                .map(|c| c.score)
                .sum();
            if bound <= best_score {
                trace!(
                    "Remaining selections score at most {}, search finished",
                    bound
                );
                break;
            }
        }

        Ok(best.map(|selection| {
            selection
                .into_iter()
                .map(|i| candidates[i].clone())
                .collect()
        }))
    }

    fn node_props(&self, node: &NodeName, keys: &Keys<'_>) -> Result<NodeProps> {
        let node = self.snapshot.node(node).ok_or_else(|| {
            SchedulerError::internal_error(format!("Node '{}' is not in the snapshot", node))
        })?;

        let value = |filter: &PropertyFilter| node.prop(&filter.key).map(str::to_string);
        Ok(NodeProps {
            same: keys.same.iter().map(value).collect(),
            different: keys.different.iter().map(value).collect(),
        })
    }

    /// State before any candidate is chosen: pinned values, the context's
    /// provider kind, and unless skipped the already-deployed nodes
    fn initial_state(&self, keys: &Keys<'_>) -> Result<SearchState> {
        let mut state = SearchState {
            used_nodes: BTreeSet::new(),
            provider_lock: self.context.locked_provider_kind,
            same_pins: keys.same.iter().map(|f| f.pinned_value.clone()).collect(),
            diff_claims: keys
                .different
                .iter()
                .map(|f| f.pinned_value.iter().cloned().collect())
                .collect(),
        };

        if self.constraints.skip_already_placed {
            return Ok(state);
        }

        for node in &self.context.deployed_nodes {
            let props = self.node_props(node, keys)?;
            for (k, pin) in state.same_pins.iter_mut().enumerate() {
                if pin.is_none() {
                    *pin = props.same[k].clone();
                }
            }
            for (k, values) in state.diff_claims.iter_mut().enumerate() {
                if let Some(value) = &props.different[k] {
                    values.push(value.clone());
                }
            }
            state.used_nodes.insert(node.clone());
        }

        Ok(state)
    }
}

/// Depth-first search from `start`; the first complete selection wins
fn find_selection(
    candidates: &[Candidate],
    props: &[NodeProps],
    keys: &Keys<'_>,
    initial: &SearchState,
    start: usize,
    replica_count: usize,
) -> Option<Vec<usize>> {
    let mut state = initial.clone();
    let mut stack: Vec<Frame> = Vec::with_capacity(replica_count);
    let mut next = start;

    loop {
        if stack.len() == replica_count {
            return Some(stack.iter().map(|frame| frame.idx).collect());
        }

        if next >= candidates.len() {
            // Exhausted this level: drop the deepest choice and try its successor
            let frame = stack.pop()?;
            let candidate = &candidates[frame.idx];
            trace!("Removing {} from current selection", candidate);
            state.undo(&frame, candidate);
            next = frame.idx + 1;
            continue;
        }

        let candidate = &candidates[next];
        match state.rejection(candidate, &props[next], keys) {
            Some(reason) => trace!("Cannot add {}: {}", candidate, reason),
            None => {
                trace!("Adding {} to current selection", candidate);
                stack.push(state.apply(next, candidate, &props[next]));
            }
        }
        next += 1;
    }
}

fn describe(candidates: &[Candidate], selection: &[usize]) -> String {
    selection
        .iter()
        .map(|&i| candidates[i].to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
