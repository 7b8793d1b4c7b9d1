//! # scout-space
//!
//! Turns a validated study definition into a search space of decision
//! variables with guard predicates, and materializes sampled assignments
//! into concrete build and runtime plans.

pub mod assignment;
pub mod materialize;
pub mod space;

pub use assignment::{Assignment, AssignedValue, DecisionValue};
pub use materialize::{materialize, BuildPlan, RuntimePlan};
pub use space::{DecisionKind, DecisionVariable, Guard, GuardClause, GuardCond, SearchSpace};
