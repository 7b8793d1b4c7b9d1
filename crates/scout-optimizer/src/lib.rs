//! # scout-optimizer
//!
//! Parameter search for the exploration loop: a unified suggest/report
//! façade over three interchangeable samplers (tree-structured Parzen,
//! NSGA-III genetic, random-forest surrogate), plus trial records and
//! Pareto utilities.

mod facade;
mod forest;
mod nsga3;
mod sampler;
mod tpe;
mod trial;

pub use facade::{Optimizer, PENALTY};
pub use forest::RfSampler;
pub use nsga3::Nsga3Sampler;
pub use sampler::Sampler;
pub use tpe::TpeSampler;
pub use trial::{
    dominates, pareto_front, BuildStatus, FailureCode, MetricRow, RunStatus, TrialFailure,
    TrialRecord,
};
