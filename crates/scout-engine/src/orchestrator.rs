//! The exploration loop binding optimizer, materializer, builder, runner,
//! aggregator and archive.
//!
//! Per-trial failures (materialization, build, run, missing metric) are
//! reported to the optimizer as penalties and archived; only configuration
//! and archive errors abort the exploration.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use scout_build::Builder;
use scout_measure::{aggregate, LikwidBackend, Measure, PerfBackend, Runner};
use scout_optimizer::{
    FailureCode, Optimizer, TrialFailure, TrialRecord,
};
use scout_space::{materialize, SearchSpace};
use scout_types::{
    Backend, BuildError, MeasureError, MetricColumn, ScoutError, ScoutResult, StudyConfig,
};

use crate::archive::Archive;
use crate::summary::ExplorationSummary;

pub struct Orchestrator {
    study_id: Uuid,
    cfg: StudyConfig,
    space: SearchSpace,
    optimizer: Optimizer,
    builder: Builder,
    backend: Box<dyn Measure>,
    archive: Archive,
    records: Vec<TrialRecord>,
    columns: Vec<MetricColumn>,
    warned_metrics: HashSet<String>,
}

impl Orchestrator {
    /// Build the full pipeline for a study, selecting the measurement
    /// backend from the config.
    pub fn new(cfg: StudyConfig, workdir_root: PathBuf) -> ScoutResult<Self> {
        let backend: Box<dyn Measure> = match (cfg.backend, &cfg.likwid) {
            (Backend::Likwid, Some(likwid)) => Box::new(LikwidBackend::new(
                likwid.clone(),
                cfg.run_timeout_s,
            )),
            (Backend::Likwid, None) => {
                return Err(scout_types::ConfigError::MissingBackendBlock {
                    block: "likwid".to_string(),
                    backend: "likwid".to_string(),
                }
                .into())
            }
            (Backend::Perf, _) => Box::new(PerfBackend::new(
                cfg.perf.clone().unwrap_or_default(),
                cfg.run_timeout_s,
            )),
        };
        Self::with_backend(cfg, workdir_root, backend)
    }

    /// Same pipeline with an injected measurement backend. This is the seam
    /// hermetic tests use.
    pub fn with_backend(
        cfg: StudyConfig,
        workdir_root: PathBuf,
        backend: Box<dyn Measure>,
    ) -> ScoutResult<Self> {
        let space = SearchSpace::compile(&cfg)?;
        let optimizer = Optimizer::new(&space, &cfg.search, &cfg.objectives);
        let builder = Builder::new(workdir_root, cfg.build_timeout_s);
        let columns = cfg.metric_columns();
        let archive = Archive::open(&cfg.csv_log, &space, &columns)?;
        let study_id = Uuid::new_v4();
        info!(
            %study_id,
            variables = space.len(),
            sampler = optimizer.sampler_name(),
            archive = %archive.path().display(),
            "exploration pipeline ready"
        );
        Ok(Self {
            study_id,
            cfg,
            space,
            optimizer,
            builder,
            backend,
            archive,
            records: Vec::new(),
            columns,
            warned_metrics: HashSet::new(),
        })
    }

    /// Run `trials` trials and produce the final summary.
    pub fn run(&mut self, trials: u32) -> ScoutResult<ExplorationSummary> {
        for trial_id in 1..=trials {
            let started = Instant::now();
            let assignment = self.optimizer.suggest();
            info!(trial_id, key = %assignment.key(), "trial start");
            let mut record = TrialRecord::new(trial_id, assignment);

            match self.execute(trial_id, &mut record) {
                Ok(objective_vector) => {
                    self.optimizer
                        .report(&record.assignment, &objective_vector, true);
                }
                Err(failure) => {
                    warn!(
                        trial_id,
                        code = failure.code.as_str(),
                        message = %failure.message,
                        "trial penalized"
                    );
                    self.optimizer.report(&record.assignment, &[], false);
                    record.mark_failed(failure, self.optimizer.penalty_vector());
                }
            }

            record.finish(started.elapsed().as_secs_f64());
            self.archive.append(&record).map_err(ScoutError::from)?;
            self.records.push(record);
        }

        let summary = ExplorationSummary::from_records(&self.records, &self.cfg.objectives);
        info!(
            study_id = %self.study_id,
            trials = summary.trials,
            feasible = summary.feasible,
            "exploration complete"
        );
        Ok(summary)
    }

    pub fn study_id(&self) -> Uuid {
        self.study_id
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    /// One trial: materialize, build, run N times, aggregate, extract the
    /// objective vector. Every failure maps to a penalized trial.
    fn execute(&mut self, trial_id: u32, record: &mut TrialRecord) -> Result<Vec<f64>, TrialFailure> {
        let (build_plan, runtime_plan) =
            materialize(&self.cfg, &self.space, &record.assignment).map_err(|e| {
                TrialFailure::new(FailureCode::MaterializationError, e.to_string())
            })?;

        let outcome = self
            .builder
            .build(trial_id, &build_plan)
            .map_err(build_failure)?;
        record.mark_built();

        let matrix = {
            let runner = Runner::new(self.backend.as_ref(), self.cfg.runs);
            runner.collect(&outcome.artifact, &runtime_plan.args, &runtime_plan.env)
        }
        .map_err(run_failure)?;

        let aggregated = aggregate(&matrix, &self.columns).map_err(|e| {
            if let MeasureError::MetricMissing(name) = &e {
                if self.warned_metrics.insert(name.clone()) {
                    warn!(metric = %name, "declared metric missing from backend output");
                }
            }
            run_failure(e)
        })?;

        let mut objective_vector = Vec::with_capacity(self.cfg.objectives.len());
        for objective in &self.cfg.objectives {
            match aggregated.get(&objective.metric) {
                Some(value) => objective_vector.push(*value),
                None => {
                    if self.warned_metrics.insert(objective.metric.clone()) {
                        warn!(metric = %objective.metric, "objective metric missing");
                    }
                    return Err(TrialFailure::new(
                        FailureCode::MetricMissing,
                        format!("objective metric '{}' missing", objective.metric),
                    ));
                }
            }
        }

        let raw_samples: BTreeMap<String, Vec<f64>> = matrix
            .metric_names()
            .map(|name| {
                (
                    name.to_string(),
                    matrix.samples(name).unwrap_or_default().to_vec(),
                )
            })
            .collect();
        record.mark_measured(raw_samples, aggregated, objective_vector.clone());
        Ok(objective_vector)
    }
}

fn build_failure(error: BuildError) -> TrialFailure {
    let code = match error {
        BuildError::Timeout { .. } => FailureCode::BuildTimeout,
        _ => FailureCode::BuildFailed,
    };
    TrialFailure::new(code, error.to_string())
}

fn run_failure(error: MeasureError) -> TrialFailure {
    let code = match error {
        MeasureError::Timeout { .. } => FailureCode::RunTimeout,
        MeasureError::MetricMissing(_) => FailureCode::MetricMissing,
        _ => FailureCode::RunFailed,
    };
    TrialFailure::new(code, error.to_string())
}
