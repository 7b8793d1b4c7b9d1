//! The optimizer façade: one suggest/report surface over the three
//! interchangeable samplers.
//!
//! Samplers always minimize; max-goal objectives are negated here at the
//! boundary. Infeasible trials are reported as a penalty vector that any
//! feasible vector dominates on every component.

use tracing::info;

use scout_space::{Assignment, SearchSpace};
use scout_types::{Goal, Objective, SamplerKind, SearchConfig};

use crate::forest::RfSampler;
use crate::nsga3::Nsga3Sampler;
use crate::sampler::Sampler;
use crate::tpe::TpeSampler;

/// Large finite sentinel: dominated on every minimized component, yet safe
/// to feed through means and variances inside the samplers.
pub const PENALTY: f64 = 1e30;

pub struct Optimizer {
    space: SearchSpace,
    goals: Vec<Goal>,
    sampler: Box<dyn Sampler>,
}

impl Optimizer {
    pub fn new(space: &SearchSpace, search: &SearchConfig, objectives: &[Objective]) -> Self {
        let sampler: Box<dyn Sampler> = match search.sampler {
            SamplerKind::Tpe => Box::new(TpeSampler::new(
                search.n_startup_trials,
                search.random_seed,
            )),
            SamplerKind::Nsga3 => Box::new(Nsga3Sampler::new(
                search.population_size,
                objectives.len(),
                search.random_seed,
            )),
            SamplerKind::Rf => Box::new(RfSampler::new(
                search.n_startup_trials,
                search.random_seed,
            )),
        };
        info!(sampler = sampler.name(), objectives = objectives.len(), "optimizer ready");
        Self {
            space: space.clone(),
            goals: objectives.iter().map(|o| o.goal).collect(),
            sampler,
        }
    }

    /// Next assignment to evaluate. Guards are enforced before the sampler
    /// sees a variable, so inactive dimensions are never sampled.
    pub fn suggest(&mut self) -> Assignment {
        let point = self.sampler.suggest(&self.space);
        self.space.assignment_from_indices(&point)
    }

    /// Record an observation. `objective_vector` is in goal space (raw
    /// metric values); it is ignored for infeasible trials.
    pub fn report(&mut self, assignment: &Assignment, objective_vector: &[f64], feasible: bool) {
        let point = self.space.indices_from_assignment(assignment);
        let signed = if feasible {
            self.goals
                .iter()
                .zip(objective_vector)
                .map(|(goal, v)| match goal {
                    Goal::Min => *v,
                    Goal::Max => -v,
                })
                .collect()
        } else {
            vec![PENALTY; self.goals.len()]
        };
        self.sampler.report(&point, &signed);
    }

    /// Goal-space penalty vector for archiving infeasible trials.
    pub fn penalty_vector(&self) -> Vec<f64> {
        self.goals
            .iter()
            .map(|goal| match goal {
                Goal::Min => PENALTY,
                Goal::Max => -PENALTY,
            })
            .collect()
    }

    pub fn sampler_name(&self) -> &str {
        self.sampler.name()
    }
}
