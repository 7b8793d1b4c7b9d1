//! End-of-exploration report: best per objective and the Pareto front.

use scout_optimizer::{pareto_front, TrialRecord};
use scout_types::{Goal, Objective};

/// What the driver prints after the last trial.
#[derive(Debug)]
pub struct ExplorationSummary {
    pub trials: usize,
    pub feasible: usize,
    pub objectives: Vec<Objective>,
    /// Per objective: (trial id, value, assignment key) of the best feasible trial.
    pub best: Vec<Option<(u32, f64, String)>>,
    /// Pareto-optimal rows: (trial id, objective vector, assignment key).
    pub front: Vec<(u32, Vec<f64>, String)>,
}

impl ExplorationSummary {
    pub fn from_records(records: &[TrialRecord], objectives: &[Objective]) -> Self {
        let feasible: Vec<&TrialRecord> = records.iter().filter(|r| r.is_feasible()).collect();

        let best = objectives
            .iter()
            .enumerate()
            .map(|(i, objective)| {
                feasible
                    .iter()
                    .filter(|r| r.objective_vector.len() > i)
                    .min_by(|a, b| {
                        let (x, y) = match objective.goal {
                            Goal::Min => (a.objective_vector[i], b.objective_vector[i]),
                            Goal::Max => (-a.objective_vector[i], -b.objective_vector[i]),
                        };
                        x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|r| (r.trial_id, r.objective_vector[i], r.assignment.key()))
            })
            .collect();

        let front = pareto_front(records, objectives)
            .into_iter()
            .map(|r| (r.trial_id, r.objective_vector.clone(), r.assignment.key()))
            .collect();

        Self {
            trials: records.len(),
            feasible: feasible.len(),
            objectives: objectives.to_vec(),
            best,
            front,
        }
    }
}

impl std::fmt::Display for ExplorationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "================ Exploration summary ================")?;
        writeln!(
            f,
            "trials: {} ({} feasible, {} penalized)",
            self.trials,
            self.feasible,
            self.trials - self.feasible
        )?;
        for (objective, best) in self.objectives.iter().zip(&self.best) {
            let goal = match objective.goal {
                Goal::Min => "min",
                Goal::Max => "max",
            };
            match best {
                Some((trial_id, value, key)) => writeln!(
                    f,
                    "best {} ({goal}): {value} @ trial {trial_id} [{key}]",
                    objective.metric
                )?,
                None => writeln!(f, "best {} ({goal}): no feasible trial", objective.metric)?,
            }
        }
        if self.objectives.len() > 1 {
            writeln!(f, "Pareto-optimal configurations:")?;
            for (trial_id, vector, key) in &self.front {
                writeln!(f, "  trial {trial_id}: objectives={vector:?} [{key}]")?;
            }
        }
        write!(f, "=====================================================")
    }
}
