//! # Optimizer Module
//!
//! Cost-based join-order optimization: filter/plan structures, the
//! permutation generator, and the search driver (exhaustive, partial
//! brute-force with greedy fill, genetic refinement).

#[allow(clippy::module_inception)]
mod optimizer;
mod permutations;
mod plan;

pub use optimizer::Optimizer;
pub use permutations::Permutations;
pub use plan::{Plan, PlanItem, TableFilter};
