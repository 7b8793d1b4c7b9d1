//! Trial records: one full build + run + measure cycle for one assignment.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scout_space::Assignment;
use scout_types::{Goal, Objective};

/// Aggregated metric label -> value row.
pub type MetricRow = BTreeMap<String, f64>;

/// Archive rows keep failure messages short.
const MESSAGE_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Ok,
    Failed,
    Timeout,
    /// The trial never reached the build step.
    Skipped,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Ok,
    Failed,
    Timeout,
    NotRun,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::NotRun => "not_run",
        }
    }
}

/// Short per-trial error codes, as recorded in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCode {
    MaterializationError,
    BuildFailed,
    BuildTimeout,
    RunFailed,
    RunTimeout,
    MetricMissing,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaterializationError => "materialization_error",
            Self::BuildFailed => "build_failed",
            Self::BuildTimeout => "build_timeout",
            Self::RunFailed => "run_failed",
            Self::RunTimeout => "run_timeout",
            Self::MetricMissing => "metric_missing",
        }
    }
}

/// Why a trial was penalized instead of measured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialFailure {
    pub code: FailureCode,
    pub message: String,
}

impl TrialFailure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        let mut message: String = message.into();
        if message.len() > MESSAGE_LIMIT {
            let cut = (0..=MESSAGE_LIMIT)
                .rev()
                .find(|i| message.is_char_boundary(*i))
                .unwrap_or(0);
            message.truncate(cut);
        }
        // Embedded newlines would break the one-row-per-trial archive shape.
        let message = message.replace('\n', " ");
        Self { code, message }
    }
}

/// A finalized exploration trial. Created before the build, finalized just
/// before the archive append, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_id: u32,
    pub assignment: Assignment,
    pub build_status: BuildStatus,
    pub run_status: RunStatus,
    pub raw_samples: BTreeMap<String, Vec<f64>>,
    pub aggregated: MetricRow,
    /// Goal-space objective values; penalty sentinels for infeasible trials.
    pub objective_vector: Vec<f64>,
    pub wallclock_s: f64,
    pub failure: Option<TrialFailure>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrialRecord {
    pub fn new(trial_id: u32, assignment: Assignment) -> Self {
        Self {
            trial_id,
            assignment,
            build_status: BuildStatus::Skipped,
            run_status: RunStatus::NotRun,
            raw_samples: BTreeMap::new(),
            aggregated: MetricRow::new(),
            objective_vector: Vec::new(),
            wallclock_s: 0.0,
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn mark_built(&mut self) {
        self.build_status = BuildStatus::Ok;
    }

    pub fn mark_measured(
        &mut self,
        raw_samples: BTreeMap<String, Vec<f64>>,
        aggregated: MetricRow,
        objective_vector: Vec<f64>,
    ) {
        self.run_status = RunStatus::Ok;
        self.raw_samples = raw_samples;
        self.aggregated = aggregated;
        self.objective_vector = objective_vector;
    }

    pub fn mark_failed(&mut self, failure: TrialFailure, penalty_vector: Vec<f64>) {
        match failure.code {
            FailureCode::BuildFailed => self.build_status = BuildStatus::Failed,
            FailureCode::BuildTimeout => self.build_status = BuildStatus::Timeout,
            FailureCode::RunFailed | FailureCode::MetricMissing => {
                self.run_status = RunStatus::Failed
            }
            FailureCode::RunTimeout => self.run_status = RunStatus::Timeout,
            FailureCode::MaterializationError => {}
        }
        self.objective_vector = penalty_vector;
        self.failure = Some(failure);
    }

    /// Seal the record for archiving.
    pub fn finish(&mut self, wallclock_s: f64) {
        self.wallclock_s = wallclock_s;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_feasible(&self) -> bool {
        self.failure.is_none()
    }
}

/// `a` dominates `b` under the declared goals: no worse everywhere,
/// strictly better somewhere.
pub fn dominates(a: &[f64], b: &[f64], objectives: &[Objective]) -> bool {
    let mut strictly_better = false;
    for ((x, y), obj) in a.iter().zip(b).zip(objectives) {
        let (x, y) = match obj.goal {
            Goal::Min => (*x, *y),
            Goal::Max => (-*x, -*y),
        };
        if x > y {
            return false;
        }
        if x < y {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Feasible, non-dominated trials.
pub fn pareto_front<'a>(
    records: &'a [TrialRecord],
    objectives: &[Objective],
) -> Vec<&'a TrialRecord> {
    let feasible: Vec<&TrialRecord> = records.iter().filter(|r| r.is_feasible()).collect();
    feasible
        .iter()
        .filter(|candidate| {
            !feasible.iter().any(|other| {
                dominates(
                    &other.objective_vector,
                    &candidate.objective_vector,
                    objectives,
                )
            })
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_space::DecisionValue;

    fn record(trial_id: u32, objectives: Vec<f64>) -> TrialRecord {
        let mut assignment = Assignment::new();
        assignment.set("opt_level", DecisionValue::Str("-O2".into()));
        let mut r = TrialRecord::new(trial_id, assignment);
        r.mark_built();
        r.mark_measured(BTreeMap::new(), MetricRow::new(), objectives);
        r.finish(1.0);
        r
    }

    #[test]
    fn lifecycle_statuses() {
        let mut r = TrialRecord::new(1, Assignment::new());
        assert_eq!(r.build_status, BuildStatus::Skipped);
        assert_eq!(r.run_status, RunStatus::NotRun);

        r.mark_built();
        assert_eq!(r.build_status, BuildStatus::Ok);

        r.mark_failed(
            TrialFailure::new(FailureCode::RunTimeout, "run exceeded timeout"),
            vec![1e30],
        );
        assert_eq!(r.run_status, RunStatus::Timeout);
        assert!(!r.is_feasible());
        assert_eq!(r.objective_vector, vec![1e30]);

        r.finish(2.5);
        assert!(r.finished_at.is_some());
        assert_eq!(r.wallclock_s, 2.5);
    }

    #[test]
    fn failure_message_is_truncated_and_single_line() {
        let long = "x".repeat(500) + "\nsecond line";
        let failure = TrialFailure::new(FailureCode::BuildFailed, long);
        assert!(failure.message.len() <= MESSAGE_LIMIT);
        assert!(!failure.message.contains('\n'));
    }

    #[test]
    fn dominates_with_mixed_goals() {
        let objectives = vec![
            Objective {
                metric: "CPI".into(),
                goal: Goal::Min,
            },
            Objective {
                metric: "Vectorization ratio".into(),
                goal: Goal::Max,
            },
        ];
        // Lower CPI and higher vectorization dominates.
        assert!(dominates(&[0.8, 90.0], &[1.0, 80.0], &objectives));
        assert!(!dominates(&[0.8, 70.0], &[1.0, 80.0], &objectives));
        assert!(!dominates(&[1.0, 80.0], &[1.0, 80.0], &objectives));
    }

    #[test]
    fn pareto_front_excludes_dominated_and_infeasible() {
        let objectives = vec![
            Objective {
                metric: "a".into(),
                goal: Goal::Min,
            },
            Objective {
                metric: "b".into(),
                goal: Goal::Min,
            },
        ];
        let mut infeasible = record(4, Vec::new());
        infeasible.mark_failed(
            TrialFailure::new(FailureCode::BuildFailed, "boom"),
            vec![1e30, 1e30],
        );
        let records = vec![
            record(1, vec![1.0, 4.0]),
            record(2, vec![4.0, 1.0]),
            record(3, vec![5.0, 5.0]),
            infeasible,
        ];
        let front = pareto_front(&records, &objectives);
        let ids: Vec<u32> = front.iter().map(|r| r.trial_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
