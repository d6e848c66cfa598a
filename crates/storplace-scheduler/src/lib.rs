//! Storplace Scheduler - Automatic replica placement
//!
//! This crate provides:
//! - Candidate pool building (access, diskless, connectivity, free space predicates)
//! - Scoring functions (most free space, least used, uniform)
//! - The constraint filter (forced pool, pinned properties, not-place-with)
//! - The branch-and-bound selection engine
//! - The `Autoplacer` driver tying them together

pub mod autoplacer;
pub mod builder;
pub mod constraint;
pub mod error;
pub mod filter;
pub mod score;
pub mod selector;
pub mod types;

// Re-export commonly used types
pub use autoplacer::{placement_context, Autoplacer, AutoplacerConfig};
pub use builder::{CandidateGroups, CandidatePoolBuilder};
pub use constraint::ConstraintFilter;
pub use error::{Result, SchedulerError};
pub use score::{ScoreFunction, ScoreStrategy};
pub use selector::Selector;
pub use types::{
    Candidate, ConstraintSet, FilterResult, Placement, PlacementContext, PropertyFilter,
    SelectedPool,
};
