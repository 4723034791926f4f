//! Hit-and-run sampling from a bounded polytope `{x : A x <= b, lo <= x <= hi}`.

use crate::encoding::{dot, LinearConstraints};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use td_types::GeneratorError;

const INTERIOR_MARGIN: f64 = 1e-9;
const MAX_PROJECTION_ROUNDS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct PolytopeSampler {
    constraints: LinearConstraints,
    bounds: Vec<(f64, f64)>,
    rng: ChaCha8Rng,
    x: Vec<f64>,
    burn_in: usize,
    thinning: usize,
    burned: bool,
}

impl PolytopeSampler {
    /// Starts from a feasible point found by alternating projections.
    pub fn new(
        constraints: LinearConstraints,
        bounds: Vec<(f64, f64)>,
        seed: u64,
    ) -> Result<Self, GeneratorError> {
        let x = find_feasible_point(&constraints, &bounds).ok_or_else(|| {
            GeneratorError::SearchSpaceExhausted {
                message: "no feasible point satisfies the linear constraints".to_string(),
            }
        })?;
        Ok(Self {
            constraints,
            bounds,
            rng: ChaCha8Rng::seed_from_u64(seed),
            x,
            burn_in: 200,
            thinning: 10,
            burned: false,
        })
    }

    pub fn with_burn_in(mut self, burn_in: usize) -> Self {
        self.burn_in = burn_in;
        self
    }

    pub fn with_thinning(mut self, thinning: usize) -> Self {
        self.thinning = thinning.max(1);
        self
    }

    pub fn sample(&mut self, n: usize) -> Vec<Vec<f64>> {
        if !self.burned {
            for _ in 0..self.burn_in {
                self.step();
            }
            self.burned = true;
        }
        (0..n)
            .map(|_| {
                for _ in 0..self.thinning {
                    self.step();
                }
                self.x.clone()
            })
            .collect()
    }

    fn step(&mut self) {
        let mut direction: Vec<f64> = (0..self.x.len())
            .map(|_| self.rng.gen_range(-1.0..1.0))
            .collect();
        let norm = dot(&direction, &direction).sqrt();
        if norm == 0.0 {
            return;
        }
        direction.iter_mut().for_each(|d| *d /= norm);

        let (mut t_min, mut t_max) = (f64::NEG_INFINITY, f64::INFINITY);
        for (row, bound) in self.constraints.a.iter().zip(&self.constraints.b) {
            let rate = dot(row, &direction);
            let slack = bound - dot(row, &self.x);
            if rate > 0.0 {
                t_max = t_max.min(slack / rate);
            } else if rate < 0.0 {
                t_min = t_min.max(slack / rate);
            }
        }
        for ((&(lo, hi), &xi), &di) in self.bounds.iter().zip(&self.x).zip(&direction) {
            if di > 0.0 {
                t_max = t_max.min((hi - xi) / di);
                t_min = t_min.max((lo - xi) / di);
            } else if di < 0.0 {
                t_max = t_max.min((lo - xi) / di);
                t_min = t_min.max((hi - xi) / di);
            }
        }
        if !(t_min < t_max) {
            return;
        }

        let t = self.rng.gen_range(t_min..t_max);
        for ((xi, di), &(lo, hi)) in self.x.iter_mut().zip(&direction).zip(&self.bounds) {
            *xi = (*xi + t * di).clamp(lo, hi);
        }
    }
}

/// Alternating projections onto the violated half-spaces and the box.
fn find_feasible_point(constraints: &LinearConstraints, bounds: &[(f64, f64)]) -> Option<Vec<f64>> {
    let mut x: Vec<f64> = bounds.iter().map(|(lo, hi)| 0.5 * (lo + hi)).collect();
    for _ in 0..MAX_PROJECTION_ROUNDS {
        let mut feasible = true;
        for (row, bound) in constraints.a.iter().zip(&constraints.b) {
            let excess = dot(row, &x) - (bound - INTERIOR_MARGIN);
            if excess <= 0.0 {
                continue;
            }
            feasible = false;
            let norm = dot(row, row);
            if norm == 0.0 {
                return None;
            }
            for (xi, ai) in x.iter_mut().zip(row) {
                *xi -= excess / norm * ai;
            }
        }
        for (xi, &(lo, hi)) in x.iter_mut().zip(bounds) {
            if *xi < lo || *xi > hi {
                feasible = false;
                *xi = xi.clamp(lo, hi);
            }
        }
        if feasible {
            return Some(x);
        }
    }
    constraints.is_satisfied(&x).then_some(x)
}
