//! NSGA-III: Pareto genetic sampler with reference-direction niching.
//!
//! Evaluation happens through the one-at-a-time suggest/report contract:
//! the sampler hands out the current generation point by point, collects
//! the reported objective vectors, and evolves once the generation is
//! fully evaluated.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use scout_space::SearchSpace;

use crate::sampler::{repair, uniform_point, Point, Sampler};

pub struct Nsga3Sampler {
    population_size: usize,
    rng: StdRng,
    ref_dirs: Vec<Vec<f64>>,
    /// Points handed out but not yet reported, oldest first.
    pending: VecDeque<Point>,
    /// The generation currently being evaluated.
    evaluated: Vec<(Point, Vec<f64>)>,
    /// Survivors of the previous environmental selection.
    parents: Vec<(Point, Vec<f64>)>,
}

impl Nsga3Sampler {
    pub fn new(population_size: usize, n_objectives: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            population_size: population_size.max(2),
            rng,
            ref_dirs: reference_directions(n_objectives.max(1), population_size.max(2)),
            pending: VecDeque::new(),
            evaluated: Vec::new(),
            parents: Vec::new(),
        }
    }

    fn refill(&mut self, space: &SearchSpace) {
        if self.parents.is_empty() && self.evaluated.is_empty() {
            // Initial generation: uniform sampling.
            for _ in 0..self.population_size {
                self.pending.push_back(uniform_point(space, &mut self.rng));
            }
            return;
        }

        // Environmental selection over everything evaluated so far.
        let mut pool = std::mem::take(&mut self.parents);
        pool.append(&mut self.evaluated);
        let survivors = self.select(&pool);
        debug!(
            pool = pool.len(),
            survivors = survivors.len(),
            "nsga3 environmental selection"
        );

        for _ in 0..self.population_size {
            let a = &survivors[self.rng.gen_range(0..survivors.len())].0;
            let b = &survivors[self.rng.gen_range(0..survivors.len())].0;
            let child = self.offspring(space, a, b);
            self.pending.push_back(child);
        }
        self.parents = survivors;
    }

    /// Non-dominated sorting plus reference-direction niching on the cut front.
    fn select(&mut self, pool: &[(Point, Vec<f64>)]) -> Vec<(Point, Vec<f64>)> {
        let fronts = fast_non_dominated_sort(pool);
        let mut survivors: Vec<(Point, Vec<f64>)> = Vec::with_capacity(self.population_size);
        for front in &fronts {
            if survivors.len() + front.len() <= self.population_size {
                survivors.extend(front.iter().map(|&i| pool[i].clone()));
                if survivors.len() == self.population_size {
                    break;
                }
            } else {
                let need = self.population_size - survivors.len();
                let chosen = self.niche(pool, front, &survivors, need);
                survivors.extend(chosen.into_iter().map(|i| pool[i].clone()));
                break;
            }
        }
        survivors
    }

    /// Pick `need` members of `front` preferring under-represented
    /// reference directions.
    fn niche(
        &mut self,
        pool: &[(Point, Vec<f64>)],
        front: &[usize],
        survivors: &[(Point, Vec<f64>)],
        need: usize,
    ) -> Vec<usize> {
        let all_vectors: Vec<&Vec<f64>> = pool
            .iter()
            .map(|(_, v)| v)
            .chain(survivors.iter().map(|(_, v)| v))
            .collect();
        let (mins, ranges) = objective_bounds(&all_vectors);

        let mut niche_counts = vec![0usize; self.ref_dirs.len()];
        for (_, vector) in survivors {
            let dir = self.associate(vector, &mins, &ranges);
            niche_counts[dir] += 1;
        }

        let mut remaining: Vec<(usize, usize, f64)> = front
            .iter()
            .map(|&i| {
                let normalized = normalize(&pool[i].1, &mins, &ranges);
                let dir = nearest_direction(&normalized, &self.ref_dirs);
                let dist = perpendicular_distance(&normalized, &self.ref_dirs[dir]);
                (i, dir, dist)
            })
            .collect();

        let mut chosen = Vec::with_capacity(need);
        while chosen.len() < need {
            // Least-crowded direction first; closest member of it wins.
            let Some(pick) = remaining
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    niche_counts[a.1]
                        .cmp(&niche_counts[b.1])
                        .then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
                })
                .map(|(pos, _)| pos)
            else {
                break;
            };
            let (idx, dir, _) = remaining.swap_remove(pick);
            niche_counts[dir] += 1;
            chosen.push(idx);
        }
        chosen
    }

    fn associate(&self, vector: &[f64], mins: &[f64], ranges: &[f64]) -> usize {
        nearest_direction(&normalize(vector, mins, ranges), &self.ref_dirs)
    }

    /// Uniform crossover + per-variable mutation, then guard repair.
    fn offspring(&mut self, space: &SearchSpace, a: &Point, b: &Point) -> Point {
        let dims = space.len().max(1);
        let mutation_rate = 1.0 / dims as f64;
        let mut raw: Vec<Option<usize>> = Vec::with_capacity(dims);
        for i in 0..dims {
            let gene = if self.rng.gen::<bool>() {
                a.get(i).copied().flatten()
            } else {
                b.get(i).copied().flatten()
            };
            let gene = if self.rng.gen::<f64>() < mutation_rate {
                let domain_len = space.variables[i].domain.len();
                Some(self.rng.gen_range(0..domain_len))
            } else {
                gene
            };
            raw.push(gene);
        }
        repair(space, &raw, &mut self.rng)
    }
}

impl Sampler for Nsga3Sampler {
    fn suggest(&mut self, space: &SearchSpace) -> Point {
        if self.pending.is_empty() {
            self.refill(space);
        }
        match self.pending.pop_front() {
            Some(point) => point,
            None => uniform_point(space, &mut self.rng),
        }
    }

    fn report(&mut self, point: &[Option<usize>], objectives: &[f64]) {
        self.evaluated.push((point.to_vec(), objectives.to_vec()));
    }

    fn name(&self) -> &str {
        "nsga3"
    }
}

/// `a` dominates `b` when it is no worse on every component and strictly
/// better on at least one (minimization).
pub(crate) fn dominates_min(a: &[f64], b: &[f64]) -> bool {
    let mut strictly_better = false;
    for (x, y) in a.iter().zip(b) {
        if x > y {
            return false;
        }
        if x < y {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Fronts of indices into `pool`, best first.
pub(crate) fn fast_non_dominated_sort(pool: &[(Point, Vec<f64>)]) -> Vec<Vec<usize>> {
    let n = pool.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut domination_count = vec![0usize; n];

    for i in 0..n {
        for j in (i + 1)..n {
            if dominates_min(&pool[i].1, &pool[j].1) {
                dominated_by[i].push(j);
                domination_count[j] += 1;
            } else if dominates_min(&pool[j].1, &pool[i].1) {
                dominated_by[j].push(i);
                domination_count[i] += 1;
            }
        }
    }

    let mut fronts: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| domination_count[i] == 0).collect();
    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            for &j in &dominated_by[i] {
                domination_count[j] -= 1;
                if domination_count[j] == 0 {
                    next.push(j);
                }
            }
        }
        fronts.push(std::mem::take(&mut current));
        current = next;
    }
    fronts
}

/// Das–Dennis simplex-lattice directions: the smallest division count whose
/// lattice covers the population, capped to keep the lattice tractable.
pub(crate) fn reference_directions(n_objectives: usize, population: usize) -> Vec<Vec<f64>> {
    if n_objectives == 1 {
        return vec![vec![1.0]];
    }
    let mut divisions = 1;
    while divisions < 12 && lattice_size(n_objectives, divisions) < population {
        divisions += 1;
    }
    let mut dirs = Vec::new();
    let mut prefix = Vec::with_capacity(n_objectives);
    lattice(n_objectives, divisions, divisions, &mut prefix, &mut dirs);
    dirs
}

fn lattice_size(m: usize, p: usize) -> usize {
    // C(p + m - 1, m - 1)
    let mut result = 1usize;
    for i in 0..(m - 1) {
        result = result.saturating_mul(p + i + 1) / (i + 1);
    }
    result
}

fn lattice(m: usize, p: usize, left: usize, prefix: &mut Vec<usize>, out: &mut Vec<Vec<f64>>) {
    if prefix.len() == m - 1 {
        let mut dir: Vec<f64> = prefix.iter().map(|&k| k as f64 / p as f64).collect();
        dir.push(left as f64 / p as f64);
        out.push(dir);
        return;
    }
    for k in 0..=left {
        prefix.push(k);
        lattice(m, p, left - k, prefix, out);
        prefix.pop();
    }
}

fn objective_bounds(vectors: &[&Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    let m = vectors.first().map_or(0, |v| v.len());
    let mut mins = vec![f64::INFINITY; m];
    let mut maxs = vec![f64::NEG_INFINITY; m];
    for vector in vectors {
        for (i, &v) in vector.iter().enumerate() {
            mins[i] = mins[i].min(v);
            maxs[i] = maxs[i].max(v);
        }
    }
    let ranges = mins
        .iter()
        .zip(&maxs)
        .map(|(lo, hi)| (hi - lo).max(1e-12))
        .collect();
    (mins, ranges)
}

fn normalize(vector: &[f64], mins: &[f64], ranges: &[f64]) -> Vec<f64> {
    vector
        .iter()
        .zip(mins.iter().zip(ranges))
        .map(|(v, (lo, range))| (v - lo) / range)
        .collect()
}

fn nearest_direction(normalized: &[f64], dirs: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, dir) in dirs.iter().enumerate() {
        let dist = perpendicular_distance(normalized, dir);
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

fn perpendicular_distance(point: &[f64], dir: &[f64]) -> f64 {
    let norm_sq: f64 = dir.iter().map(|d| d * d).sum();
    if norm_sq <= 0.0 {
        return point.iter().map(|p| p * p).sum::<f64>().sqrt();
    }
    let dot: f64 = point.iter().zip(dir).map(|(p, d)| p * d).sum();
    let scale = dot / norm_sq;
    point
        .iter()
        .zip(dir)
        .map(|(p, d)| (p - scale * d).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominates_requires_strict_improvement() {
        assert!(dominates_min(&[1.0, 1.0], &[2.0, 1.0]));
        assert!(!dominates_min(&[1.0, 1.0], &[1.0, 1.0]));
        assert!(!dominates_min(&[1.0, 2.0], &[2.0, 1.0]));
    }

    #[test]
    fn non_dominated_sort_layers_fronts() {
        let pool: Vec<(Point, Vec<f64>)> = vec![
            (vec![Some(0)], vec![1.0, 4.0]),
            (vec![Some(1)], vec![4.0, 1.0]),
            (vec![Some(2)], vec![2.0, 2.0]),
            (vec![Some(3)], vec![5.0, 5.0]),
        ];
        let fronts = fast_non_dominated_sort(&pool);
        assert_eq!(fronts[0], vec![0, 1, 2]);
        assert_eq!(fronts[1], vec![3]);
    }

    #[test]
    fn das_dennis_counts() {
        // m=2, p=4 -> 5 directions on the line x+y=1.
        let dirs = reference_directions(2, 5);
        assert_eq!(dirs.len(), 5);
        for dir in &dirs {
            assert!((dir.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
        // Four objectives still produce a covering lattice.
        let dirs = reference_directions(4, 20);
        assert!(dirs.len() >= 20);
    }

    #[test]
    fn generation_cycle_respects_guards() {
        let space = crate::sampler::tests::guarded_space();
        let mut sampler = Nsga3Sampler::new(8, 2, Some(11));
        for trial in 0..48 {
            let point = sampler.suggest(&space);
            let assignment = space.assignment_from_indices(&point);
            space.verify_guards(&assignment).unwrap();
            let f = trial as f64;
            sampler.report(&point, &[f % 5.0, 5.0 - f % 5.0]);
        }
    }

    #[test]
    fn selection_keeps_non_dominated_points() {
        let mut sampler = Nsga3Sampler::new(2, 2, Some(5));
        let pool: Vec<(Point, Vec<f64>)> = vec![
            (vec![Some(0)], vec![0.0, 3.0]),
            (vec![Some(1)], vec![3.0, 0.0]),
            (vec![Some(2)], vec![4.0, 4.0]),
        ];
        let survivors = sampler.select(&pool);
        assert_eq!(survivors.len(), 2);
        let kept: Vec<usize> = survivors.iter().map(|(p, _)| p[0].unwrap()).collect();
        assert!(kept.contains(&0));
        assert!(kept.contains(&1));
    }
}
