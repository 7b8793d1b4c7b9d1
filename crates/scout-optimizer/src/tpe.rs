//! Tree-structured Parzen estimator over categorical decision variables.
//!
//! Single-objective: steers on objective index 0. Observations are split at
//! the gamma quantile into good/bad sets; per variable, candidates are
//! drawn from the good-set density and scored by the l(x)/g(x) ratio.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use scout_space::SearchSpace;

use crate::sampler::{
    sample_point, smoothed_counts, uniform_point, weighted_draw, Point, Sampler,
};

const GAMMA: f64 = 0.25;
const N_CANDIDATES: usize = 24;

pub struct TpeSampler {
    n_startup: usize,
    history: Vec<(Point, f64)>,
    rng: StdRng,
}

impl TpeSampler {
    pub fn new(n_startup: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            n_startup: n_startup.max(1),
            history: Vec::new(),
            rng,
        }
    }
}

/// Split the history into (good, bad) point sets at the gamma quantile.
fn split_history(history: &[(Point, f64)]) -> (Vec<&Point>, Vec<&Point>) {
    let mut order: Vec<usize> = (0..history.len()).collect();
    order.sort_by(|a, b| {
        history[*a]
            .1
            .partial_cmp(&history[*b].1)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let n_good = ((history.len() as f64 * GAMMA).ceil() as usize).max(1);
    let good = order[..n_good].iter().map(|i| &history[*i].0).collect();
    let bad = order[n_good..].iter().map(|i| &history[*i].0).collect();
    (good, bad)
}

impl Sampler for TpeSampler {
    fn suggest(&mut self, space: &SearchSpace) -> Point {
        if self.history.len() < self.n_startup {
            return uniform_point(space, &mut self.rng);
        }

        let (good, bad) = split_history(&self.history);
        debug!(good = good.len(), bad = bad.len(), "tpe split");

        sample_point(space, &mut self.rng, |var_idx, var, rng| {
            let l = smoothed_counts(&good, var_idx, var.domain.len());
            let g = smoothed_counts(&bad, var_idx, var.domain.len());
            let mut best_idx = 0;
            let mut best_ratio = f64::NEG_INFINITY;
            for _ in 0..N_CANDIDATES {
                let candidate = weighted_draw(&l, rng);
                let ratio = l[candidate] / g[candidate];
                if ratio > best_ratio {
                    best_ratio = ratio;
                    best_idx = candidate;
                }
            }
            best_idx
        })
    }

    fn report(&mut self, point: &[Option<usize>], objectives: &[f64]) {
        let score = objectives.first().copied().unwrap_or(f64::INFINITY);
        self.history.push((point.to_vec(), score));
    }

    fn name(&self) -> &str {
        "tpe"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_types::StudyConfig;

    fn two_level_space() -> SearchSpace {
        let cfg = StudyConfig::from_json(
            r#"{
                "backend": "perf",
                "source": "x.c",
                "compiler_flags": ["-O2", "-O3"]
            }"#,
        )
        .unwrap();
        SearchSpace::compile(&cfg).unwrap()
    }

    #[test]
    fn startup_phase_is_uniform_and_valid() {
        let space = two_level_space();
        let mut tpe = TpeSampler::new(10, Some(42));
        for _ in 0..10 {
            let point = tpe.suggest(&space);
            assert_eq!(point.len(), 1);
            assert!(point[0].is_some());
        }
    }

    #[test]
    fn steers_toward_clearly_better_value() {
        let space = two_level_space();
        let mut tpe = TpeSampler::new(4, Some(42));
        // Index 1 (-O3) is strongly better; feed a lopsided history.
        for i in 0..20 {
            let idx = i % 2;
            let score = if idx == 1 { 0.5 } else { 2.0 };
            tpe.report(&[Some(idx)], &[score]);
        }
        let picks: Vec<Point> = (0..20).map(|_| tpe.suggest(&space)).collect();
        let good = picks.iter().filter(|p| p[0] == Some(1)).count();
        assert!(good > 10, "expected mostly -O3 picks, got {good}/20");
    }

    #[test]
    fn penalized_reports_land_in_bad_set() {
        let mut tpe = TpeSampler::new(1, Some(1));
        tpe.report(&[Some(0)], &[1.0]);
        tpe.report(&[Some(1)], &[crate::facade::PENALTY]);
        let (good, bad) = split_history(&tpe.history);
        assert_eq!(good.len(), 1);
        assert_eq!(good[0][0], Some(0));
        assert_eq!(bad[0][0], Some(1));
    }

    #[test]
    fn guard_honoring_over_many_suggestions() {
        let space = crate::sampler::tests::guarded_space();
        let mut tpe = TpeSampler::new(5, Some(9));
        for i in 0..120 {
            let point = tpe.suggest(&space);
            let assignment = space.assignment_from_indices(&point);
            space.verify_guards(&assignment).unwrap();
            tpe.report(&point, &[i as f64 % 3.0]);
        }
    }
}
