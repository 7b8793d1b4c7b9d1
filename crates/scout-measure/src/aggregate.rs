//! Reduction of repeated-run samples into one aggregated row.

use std::collections::BTreeMap;

use scout_types::{AggMode, MeasureError, MetricColumn};

use crate::backend::MetricMap;

/// Samples collected across the repetitions of one trial: metric -> one
/// value per run that produced it.
#[derive(Debug, Clone, Default)]
pub struct SampleMatrix {
    samples: BTreeMap<String, Vec<f64>>,
    runs: u32,
}

impl SampleMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_run(&mut self, metrics: MetricMap) {
        self.runs += 1;
        for (name, value) in metrics {
            self.samples.entry(name).or_default().push(value);
        }
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn samples(&self, metric: &str) -> Option<&[f64]> {
        self.samples.get(metric).map(Vec::as_slice)
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }
}

/// Reduce the matrix per declared column. A declared metric with no samples
/// is an error; undeclared metrics that showed up anyway are passed through
/// with the default `avg` reduction.
pub fn aggregate(
    matrix: &SampleMatrix,
    columns: &[MetricColumn],
) -> Result<MetricMap, MeasureError> {
    let mut out = MetricMap::new();

    for column in columns {
        let samples = matrix
            .samples(&column.name)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MeasureError::MetricMissing(column.name.clone()))?;
        out.insert(column.name.clone(), reduce(column.agg, samples));
        if column.var {
            out.insert(format!("{}_var", column.name), sample_variance(samples));
        }
    }

    for name in matrix.metric_names() {
        if !out.contains_key(name) {
            if let Some(samples) = matrix.samples(name) {
                out.insert(name.to_string(), reduce(AggMode::Avg, samples));
            }
        }
    }

    Ok(out)
}

fn reduce(agg: AggMode, samples: &[f64]) -> f64 {
    match agg {
        AggMode::Avg => samples.iter().sum::<f64>() / samples.len() as f64,
        AggMode::Min => samples.iter().cloned().fold(f64::INFINITY, f64::min),
        AggMode::Max => samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        AggMode::Median => {
            let mut sorted = samples.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            }
        }
    }
}

/// Unbiased sample variance; 0.0 with fewer than two samples.
fn sample_variance(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64
}
