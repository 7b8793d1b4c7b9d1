//! Random-forest surrogate sampler.
//!
//! Falls back to uniform sampling during warm-up, then fits a forest of
//! bootstrap-sampled regression trees over the decision indices and picks
//! the candidate with the highest expected improvement on objective 0.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use scout_space::SearchSpace;

use crate::sampler::{uniform_point, Point, Sampler};

const N_TREES: usize = 24;
const N_CANDIDATES: usize = 128;
const MAX_DEPTH: usize = 6;
const MIN_LEAF: usize = 2;

pub struct RfSampler {
    warmup: usize,
    history: Vec<(Point, f64)>,
    rng: StdRng,
}

impl RfSampler {
    pub fn new(n_startup: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            warmup: n_startup.max(10),
            history: Vec::new(),
            rng,
        }
    }

    fn features(point: &[Option<usize>]) -> Vec<f64> {
        point
            .iter()
            .map(|slot| match slot {
                Some(idx) => *idx as f64,
                // Distinct sentinel so trees can separate inactive points.
                None => -1.0,
            })
            .collect()
    }
}

impl Sampler for RfSampler {
    fn suggest(&mut self, space: &SearchSpace) -> Point {
        if self.history.len() < self.warmup {
            return uniform_point(space, &mut self.rng);
        }

        let data: Vec<(Vec<f64>, f64)> = self
            .history
            .iter()
            .map(|(point, y)| (Self::features(point), *y))
            .collect();
        let forest = Forest::fit(&data, &mut self.rng);
        let best_observed = self
            .history
            .iter()
            .map(|(_, y)| *y)
            .fold(f64::INFINITY, f64::min);

        let mut best_point = uniform_point(space, &mut self.rng);
        let mut best_ei = expected_improvement(&forest, &Self::features(&best_point), best_observed);
        for _ in 1..N_CANDIDATES {
            let candidate = uniform_point(space, &mut self.rng);
            let ei = expected_improvement(&forest, &Self::features(&candidate), best_observed);
            if ei > best_ei {
                best_ei = ei;
                best_point = candidate;
            }
        }
        debug!(ei = best_ei, "rf candidate chosen");
        best_point
    }

    fn report(&mut self, point: &[Option<usize>], objectives: &[f64]) {
        let score = objectives.first().copied().unwrap_or(f64::INFINITY);
        self.history.push((point.to_vec(), score));
    }

    fn name(&self) -> &str {
        "rf"
    }
}

/// Expected improvement for minimization.
fn expected_improvement(forest: &Forest, features: &[f64], best: f64) -> f64 {
    let (mean, std) = forest.predict(features);
    if std <= 1e-12 {
        return (best - mean).max(0.0);
    }
    let z = (best - mean) / std;
    std * (z * normal_cdf(z) + normal_pdf(z))
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + (x / std::f64::consts::SQRT_2).tanh())
}

fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

// ---------------------------------------------------------------------------
// Regression forest
// ---------------------------------------------------------------------------

struct Forest {
    trees: Vec<Node>,
}

impl Forest {
    fn fit(data: &[(Vec<f64>, f64)], rng: &mut StdRng) -> Self {
        let trees = (0..N_TREES)
            .map(|_| {
                let sample: Vec<(Vec<f64>, f64)> = (0..data.len())
                    .map(|_| data[rng.gen_range(0..data.len())].clone())
                    .collect();
                Node::fit(&sample, 0, rng)
            })
            .collect();
        Self { trees }
    }

    /// Mean and standard deviation of the per-tree predictions.
    fn predict(&self, features: &[f64]) -> (f64, f64) {
        let predictions: Vec<f64> = self.trees.iter().map(|t| t.predict(features)).collect();
        let mean = predictions.iter().sum::<f64>() / predictions.len() as f64;
        let variance = predictions
            .iter()
            .map(|p| (p - mean).powi(2))
            .sum::<f64>()
            / predictions.len() as f64;
        (mean, variance.sqrt())
    }
}

enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn fit(data: &[(Vec<f64>, f64)], depth: usize, rng: &mut StdRng) -> Self {
        if depth >= MAX_DEPTH || data.len() < 2 * MIN_LEAF {
            return Self::Leaf(mean_y(data));
        }

        let dims = data[0].0.len();
        if dims == 0 {
            return Self::Leaf(mean_y(data));
        }
        // Random feature subset, roughly sqrt of the dimensionality.
        let n_try = ((dims as f64).sqrt().ceil() as usize).max(1);
        let mut best: Option<(usize, f64, f64)> = None;
        for _ in 0..n_try {
            let feature = rng.gen_range(0..dims);
            if let Some((threshold, sse)) = best_split(data, feature) {
                if best.map_or(true, |(_, _, best_sse)| sse < best_sse) {
                    best = Some((feature, threshold, sse));
                }
            }
        }

        let Some((feature, threshold, _)) = best else {
            return Self::Leaf(mean_y(data));
        };
        let (left_data, right_data): (Vec<_>, Vec<_>) = data
            .iter()
            .cloned()
            .partition(|(x, _)| x[feature] <= threshold);
        if left_data.len() < MIN_LEAF || right_data.len() < MIN_LEAF {
            return Self::Leaf(mean_y(data));
        }

        Self::Split {
            feature,
            threshold,
            left: Box::new(Self::fit(&left_data, depth + 1, rng)),
            right: Box::new(Self::fit(&right_data, depth + 1, rng)),
        }
    }

    fn predict(&self, features: &[f64]) -> f64 {
        match self {
            Self::Leaf(value) => *value,
            Self::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if features.get(*feature).copied().unwrap_or(-1.0) <= *threshold {
                    left.predict(features)
                } else {
                    right.predict(features)
                }
            }
        }
    }
}

fn mean_y(data: &[(Vec<f64>, f64)]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|(_, y)| *y).sum::<f64>() / data.len() as f64
}

/// Best threshold on one feature by sum of squared errors, among midpoints
/// of adjacent distinct values.
fn best_split(data: &[(Vec<f64>, f64)], feature: usize) -> Option<(f64, f64)> {
    let mut values: Vec<f64> = data.iter().map(|(x, _)| x[feature]).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values.dedup();
    if values.len() < 2 {
        return None;
    }

    let mut best: Option<(f64, f64)> = None;
    for window in values.windows(2) {
        let threshold = (window[0] + window[1]) / 2.0;
        let (left, right): (Vec<_>, Vec<_>) =
            data.iter().partition(|(x, _)| x[feature] <= threshold);
        if left.is_empty() || right.is_empty() {
            continue;
        }
        let sse = sse(&left) + sse(&right);
        if best.map_or(true, |(_, best_sse)| sse < best_sse) {
            best = Some((threshold, sse));
        }
    }
    best
}

fn sse(data: &[&(Vec<f64>, f64)]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mean = data.iter().map(|(_, y)| *y).sum::<f64>() / data.len() as f64;
    data.iter().map(|(_, y)| (y - mean).powi(2)).sum()
}
