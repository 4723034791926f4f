//! Generator back-end contract.

use crate::encoding::LinearConstraints;
use crate::training::TrainingData;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use td_types::GeneratorError;

/// Options forwarded to a back-end on every `gen` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenOptions {
    /// Draws rejection sampling may spend before giving up.
    pub max_rs_draws: usize,
    /// Switch to hit-and-run sampling when rejection sampling runs out.
    pub fallback_to_polytope: bool,
    /// Candidate pool size for model-based back-ends.
    pub num_candidates: Option<usize>,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            max_rs_draws: 10_000,
            fallback_to_polytope: false,
            num_candidates: None,
        }
    }
}

impl GenOptions {
    pub fn with_max_rs_draws(mut self, max_rs_draws: usize) -> Self {
        self.max_rs_draws = max_rs_draws;
        self
    }

    pub fn with_fallback_to_polytope(mut self, fallback: bool) -> Self {
        self.fallback_to_polytope = fallback;
        self
    }

    pub fn with_num_candidates(mut self, num_candidates: usize) -> Self {
        self.num_candidates = Some(num_candidates);
        self
    }
}

/// Rounds an encoded point onto the values it can decode to.
pub type RoundingFn<'a> = &'a dyn Fn(&[f64]) -> Vec<f64>;

/// Everything a back-end needs for one `gen` call.
pub struct GenRequest<'a> {
    pub n: usize,
    pub bounds: &'a [(f64, f64)],
    pub linear_constraints: Option<&'a LinearConstraints>,
    /// Column index to pinned value.
    pub fixed_features: &'a BTreeMap<usize, f64>,
    pub rounding_func: Option<RoundingFn<'a>>,
    /// Points already in the experiment, used for deduplication.
    pub generated_points: &'a [Vec<f64>],
    pub model_gen_options: &'a GenOptions,
}

impl<'a> GenRequest<'a> {
    pub fn new(n: usize, bounds: &'a [(f64, f64)], options: &'a GenOptions) -> Self {
        static NO_FIXED: BTreeMap<usize, f64> = BTreeMap::new();
        Self {
            n,
            bounds,
            linear_constraints: None,
            fixed_features: &NO_FIXED,
            rounding_func: None,
            generated_points: &[],
            model_gen_options: options,
        }
    }

    pub fn with_linear_constraints(mut self, constraints: &'a LinearConstraints) -> Self {
        self.linear_constraints = Some(constraints);
        self
    }

    pub fn with_fixed_features(mut self, fixed_features: &'a BTreeMap<usize, f64>) -> Self {
        self.fixed_features = fixed_features;
        self
    }

    pub fn with_rounding_func(mut self, rounding_func: RoundingFn<'a>) -> Self {
        self.rounding_func = Some(rounding_func);
        self
    }

    pub fn with_generated_points(mut self, generated_points: &'a [Vec<f64>]) -> Self {
        self.generated_points = generated_points;
        self
    }

    pub fn dim(&self) -> usize {
        self.bounds.len()
    }

    /// Apply fixed features and rounding to a raw draw.
    pub fn finish_point(&self, mut x: Vec<f64>) -> Vec<f64> {
        for (&j, &value) in self.fixed_features {
            if let Some(slot) = x.get_mut(j) {
                *slot = value;
            }
        }
        match self.rounding_func {
            Some(round) => round(&x),
            None => x,
        }
    }

    pub fn is_feasible(&self, x: &[f64]) -> bool {
        self.linear_constraints.map_or(true, |c| c.is_satisfied(x))
    }

    /// Reject anything outside the unit cube.
    pub fn require_unit_bounds(&self) -> Result<(), GeneratorError> {
        if self.bounds.iter().any(|&(lo, hi)| lo != 0.0 || hi != 1.0) {
            return Err(GeneratorError::UnsupportedBounds {
                bounds: self.bounds.to_vec(),
            });
        }
        Ok(())
    }
}

/// Points proposed by a back-end, with one weight per point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedPoints {
    pub points: Vec<Vec<f64>>,
    pub weights: Vec<f64>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl GeneratedPoints {
    pub fn unit_weights(points: Vec<Vec<f64>>) -> Self {
        let weights = vec![1.0; points.len()];
        Self {
            points,
            weights,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Seed and sequence position of a stateful back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorState {
    pub seed: u64,
    pub init_position: u64,
}

/// A pluggable point generator.
///
/// Implementations work on the unit cube produced by
/// [`SearchSpaceEncoding`](crate::encoding::SearchSpaceEncoding). State that
/// must survive re-instantiation is exposed through [`state`](Self::state)
/// and recorded on every generator run.
pub trait GeneratorBackend: Send {
    fn name(&self) -> &str;

    /// Learn from observed data. Model-free back-ends ignore it.
    fn fit(&mut self, _data: &TrainingData) -> Result<(), GeneratorError> {
        Ok(())
    }

    fn gen(&mut self, request: &GenRequest<'_>) -> Result<GeneratedPoints, GeneratorError>;

    /// Per-metric predicted means for each point, if the back-end has a model.
    fn predict(&self, _points: &[Vec<f64>]) -> Option<Vec<BTreeMap<String, f64>>> {
        None
    }

    fn state(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Combine a base seed and a sequence position into a per-draw seed using
/// MurmurHash3's 64-bit finalizer.
pub fn mix_seed(seed: u64, position: u64) -> u64 {
    let mut h = seed
        .wrapping_mul(0xff51_afd7_ed55_8ccd)
        .wrapping_add(position)
        .wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

/// RNG for the draw at `position` of the stream seeded with `seed`.
pub fn rng_at(seed: u64, position: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(mix_seed(seed, position))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn streams_are_reproducible_and_distinct() {
        let a: f64 = rng_at(7, 3).gen();
        let b: f64 = rng_at(7, 3).gen();
        let c: f64 = rng_at(7, 4).gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(mix_seed(0, 1), mix_seed(1, 0));
    }

    #[test]
    fn request_applies_fixed_features_before_rounding() {
        let bounds = vec![(0.0, 1.0); 2];
        let options = GenOptions::default();
        let fixed = BTreeMap::from([(1, 0.5)]);
        let round = |x: &[f64]| x.iter().map(|v| (v * 10.0).round() / 10.0).collect::<Vec<_>>();
        let request = GenRequest::new(1, &bounds, &options)
            .with_fixed_features(&fixed)
            .with_rounding_func(&round);
        assert_eq!(request.finish_point(vec![0.123, 0.9]), vec![0.1, 0.5]);
        assert!(request.require_unit_bounds().is_ok());

        let wide = vec![(-1.0, 1.0)];
        let request = GenRequest::new(1, &wide, &options);
        assert!(matches!(
            request.require_unit_bounds(),
            Err(GeneratorError::UnsupportedBounds { .. })
        ));
    }
}
