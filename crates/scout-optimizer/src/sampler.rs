//! The sampler contract and shared guard-aware sampling helpers.
//!
//! Samplers work on points: one domain index per decision variable, `None`
//! when the variable's guard masked it out. Guards are enforced during
//! point construction, before the underlying strategy sees the variable,
//! so inactive dimensions never consume search budget.

use rand::rngs::StdRng;
use rand::Rng;

use scout_space::{Assignment, DecisionVariable, SearchSpace};

/// One domain index per declared variable; `None` means inactive.
pub type Point = Vec<Option<usize>>;

/// Common trait for the three search strategies. Objective vectors arrive
/// already goal-signed (always minimized) and penalty-substituted.
pub trait Sampler {
    /// Produce the next point to evaluate.
    fn suggest(&mut self, space: &SearchSpace) -> Point;

    /// Record an observed result so adaptive strategies can learn.
    fn report(&mut self, point: &[Option<usize>], objectives: &[f64]);

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Walk the variables in declaration order, evaluating each guard against
/// the prefix built so far; active variables get an index from `choose`.
pub fn sample_point<C>(space: &SearchSpace, rng: &mut StdRng, mut choose: C) -> Point
where
    C: FnMut(usize, &DecisionVariable, &mut StdRng) -> usize,
{
    let mut prefix = Assignment::new();
    let mut point = Vec::with_capacity(space.len());
    for (i, var) in space.variables.iter().enumerate() {
        if var.is_active(&prefix) {
            let idx = choose(i, var, rng).min(var.domain.len() - 1);
            prefix.set(var.name.clone(), var.domain[idx].clone());
            point.push(Some(idx));
        } else {
            prefix.set_inactive(var.name.clone());
            point.push(None);
        }
    }
    point
}

/// Uniform random point respecting guards.
pub fn uniform_point(space: &SearchSpace, rng: &mut StdRng) -> Point {
    sample_point(space, rng, |_, var, rng| rng.gen_range(0..var.domain.len()))
}

/// Re-establish guard consistency after crossover/mutation: active slots
/// keep their index where the guard still holds, otherwise a fresh uniform
/// draw; inactive variables are masked.
pub fn repair(space: &SearchSpace, raw: &[Option<usize>], rng: &mut StdRng) -> Point {
    sample_point(space, rng, |i, var, rng| {
        match raw.get(i).copied().flatten() {
            Some(idx) if idx < var.domain.len() => idx,
            _ => rng.gen_range(0..var.domain.len()),
        }
    })
}

/// Categorical density with +1 Laplace smoothing over the domain, built
/// from the active occurrences of variable `var_idx` in `points`.
pub fn smoothed_counts(points: &[&Point], var_idx: usize, domain_len: usize) -> Vec<f64> {
    let mut counts = vec![1.0; domain_len];
    for point in points {
        if let Some(Some(idx)) = point.get(var_idx) {
            if *idx < domain_len {
                counts[*idx] += 1.0;
            }
        }
    }
    let total: f64 = counts.iter().sum();
    counts.iter_mut().for_each(|c| *c /= total);
    counts
}

/// Draw an index from a normalized categorical distribution.
pub fn weighted_draw(weights: &[f64], rng: &mut StdRng) -> usize {
    let mut threshold: f64 = rng.gen();
    for (i, w) in weights.iter().enumerate() {
        threshold -= w;
        if threshold <= 0.0 {
            return i;
        }
    }
    weights.len() - 1
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::SeedableRng;
    use scout_types::StudyConfig;

    pub(crate) fn guarded_space() -> SearchSpace {
        let cfg = StudyConfig::from_json(
            r#"{
                "backend": "perf",
                "source": "x.c",
                "compiler_flags": ["-O1", "-O2", "-O3"],
                "compiler_params": {
                    "-flto": {"when": {"opt_level": "3+"}, "values": [true, false]}
                },
                "env": {
                    "ACPP_VISIBILITY_MASK": ["omp", "ocl"],
                    "OMP_PLACES": {"when": {"ACPP_VISIBILITY_MASK": "omp"}, "values": ["cores", "sockets"]}
                }
            }"#,
        )
        .unwrap();
        SearchSpace::compile(&cfg).unwrap()
    }

    #[test]
    fn uniform_points_respect_guards() {
        let space = guarded_space();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let point = uniform_point(&space, &mut rng);
            let assignment = space.assignment_from_indices(&point);
            space.verify_guards(&assignment).unwrap();
        }
    }

    #[test]
    fn repair_masks_guard_violations() {
        let space = guarded_space();
        let mut rng = StdRng::seed_from_u64(7);
        // -flto forced active although opt_level is -O1.
        let broken = vec![Some(0), Some(0), Some(0), Some(0)];
        let fixed = repair(&space, &broken, &mut rng);
        assert_eq!(fixed[0], Some(0));
        assert_eq!(fixed[1], None);
    }

    #[test]
    fn repair_fills_missing_dimensions() {
        let space = guarded_space();
        let mut rng = StdRng::seed_from_u64(7);
        let fixed = repair(&space, &[], &mut rng);
        assert_eq!(fixed.len(), space.len());
        let assignment = space.assignment_from_indices(&fixed);
        space.verify_guards(&assignment).unwrap();
    }

    #[test]
    fn smoothed_counts_normalize() {
        let a: Point = vec![Some(0)];
        let b: Point = vec![Some(0)];
        let c: Point = vec![Some(1)];
        let points = vec![&a, &b, &c];
        let density = smoothed_counts(&points, 0, 2);
        assert!((density.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(density[0] > density[1]);
    }

    #[test]
    fn weighted_draw_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let weights = vec![0.1, 0.2, 0.7];
        for _ in 0..100 {
            assert!(weighted_draw(&weights, &mut rng) < 3);
        }
    }
}
