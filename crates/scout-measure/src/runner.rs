//! Repeated execution of one artifact under the measurement backend.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use scout_types::MeasureError;

use crate::aggregate::SampleMatrix;
use crate::backend::Measure;

/// Runs the artifact `runs` times in series, each repetition in a fresh
/// child process with the same runtime environment, and collects the
/// samples. Any failed repetition fails the trial.
pub struct Runner<'a> {
    backend: &'a dyn Measure,
    runs: u32,
}

impl<'a> Runner<'a> {
    pub fn new(backend: &'a dyn Measure, runs: u32) -> Self {
        Self { backend, runs }
    }

    pub fn collect(
        &self,
        artifact: &Path,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<SampleMatrix, MeasureError> {
        let mut matrix = SampleMatrix::new();
        for rep in 1..=self.runs {
            debug!(rep, runs = self.runs, backend = self.backend.name(), "run");
            let metrics = self.backend.collect(artifact, args, env)?;
            matrix.push_run(metrics);
        }
        info!(
            runs = matrix.runs(),
            backend = self.backend.name(),
            "measurement complete"
        );
        Ok(matrix)
    }
}
