//! Model-free space-filling back-end.

use crate::encoding::LinearConstraints;
use crate::generator::{
    rng_at, GenRequest, GeneratedPoints, GeneratorBackend, GeneratorState,
};
use crate::polytope::PolytopeSampler;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use td_types::GeneratorError;
use tracing::{debug, warn};

pub const UNIFORM_GENERATOR_KEY: &str = "uniform";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingScheme {
    /// Independent uniform draws.
    #[default]
    Uniform,
    /// Halton low-discrepancy sequence.
    Halton,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniformGeneratorConfig {
    /// Drawn at random when absent; the drawn seed is kept in the run state.
    pub seed: Option<u64>,
    pub scheme: SamplingScheme,
    /// Random per-dimension shift of the Halton sequence.
    pub scramble: bool,
    pub deduplicate: bool,
    pub init_position: u64,
}

impl Default for UniformGeneratorConfig {
    fn default() -> Self {
        Self {
            seed: None,
            scheme: SamplingScheme::Uniform,
            scramble: true,
            deduplicate: true,
            init_position: 0,
        }
    }
}

impl UniformGeneratorConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_scheme(mut self, scheme: SamplingScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_scramble(mut self, scramble: bool) -> Self {
        self.scramble = scramble;
        self
    }

    pub fn with_deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    pub fn with_init_position(mut self, init_position: u64) -> Self {
        self.init_position = init_position;
        self
    }
}

/// Seeded uniform or Halton sampling with rejection of infeasible and
/// duplicate points.
///
/// Every draw advances the sequence position, accepted or not, so a
/// generator rebuilt from `(seed, init_position)` continues exactly where
/// the previous one stopped.
#[derive(Debug, Clone)]
pub struct UniformGenerator {
    seed: u64,
    scheme: SamplingScheme,
    scramble: bool,
    deduplicate: bool,
    init_position: u64,
}

impl UniformGenerator {
    pub fn new(config: &UniformGeneratorConfig) -> Self {
        Self {
            seed: config.seed.unwrap_or_else(rand::random),
            scheme: config.scheme,
            scramble: config.scramble,
            deduplicate: config.deduplicate,
            init_position: config.init_position,
        }
    }

    /// Resume from a recorded state; the config supplies everything else.
    pub fn from_state(config: &UniformGeneratorConfig, state: GeneratorState) -> Self {
        Self {
            seed: state.seed,
            init_position: state.init_position,
            ..Self::new(config)
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn init_position(&self) -> u64 {
        self.init_position
    }

    fn draw(&self, position: u64, dim: usize) -> Vec<f64> {
        match self.scheme {
            SamplingScheme::Uniform => {
                let mut rng = rng_at(self.seed, position);
                (0..dim).map(|_| rng.gen::<f64>()).collect()
            }
            SamplingScheme::Halton => {
                let shifts: Vec<f64> = if self.scramble {
                    let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
                    (0..dim).map(|_| rng.gen::<f64>()).collect()
                } else {
                    vec![0.0; dim]
                };
                first_primes(dim)
                    .into_iter()
                    .zip(shifts)
                    .map(|(base, shift)| (halton(position + 1, base) + shift).fract())
                    .collect()
            }
        }
    }

    fn sample_polytope(
        &self,
        request: &GenRequest<'_>,
        constraints: &LinearConstraints,
        seed: u64,
        n: usize,
    ) -> Result<Vec<Vec<f64>>, GeneratorError> {
        let dim = request.dim();
        let free: Vec<usize> = (0..dim)
            .filter(|j| !request.fixed_features.contains_key(j))
            .collect();

        // Fixed columns move to the right-hand side.
        let mut reduced = LinearConstraints::default();
        for (row, bound) in constraints.a.iter().zip(&constraints.b) {
            let pinned: f64 = request
                .fixed_features
                .iter()
                .map(|(&j, &v)| row.get(j).copied().unwrap_or(0.0) * v)
                .sum();
            reduced.a.push(free.iter().map(|&j| row[j]).collect());
            reduced.b.push(bound - pinned);
        }

        let mut sampler = PolytopeSampler::new(reduced, vec![(0.0, 1.0); free.len()], seed)?;
        Ok(sampler
            .sample(n)
            .into_iter()
            .map(|z| {
                let mut x = vec![0.0; dim];
                for (&j, v) in free.iter().zip(z) {
                    x[j] = v;
                }
                request.finish_point(x)
            })
            .collect())
    }
}

impl GeneratorBackend for UniformGenerator {
    fn name(&self) -> &str {
        UNIFORM_GENERATOR_KEY
    }

    fn gen(&mut self, request: &GenRequest<'_>) -> Result<GeneratedPoints, GeneratorError> {
        request.require_unit_bounds()?;
        let max_draws = request.model_gen_options.max_rs_draws;
        let mut accepted: Vec<Vec<f64>> = Vec::with_capacity(request.n);
        let mut draws = 0;

        while accepted.len() < request.n && draws < max_draws {
            let x = request.finish_point(self.draw(self.init_position, request.dim()));
            self.init_position += 1;
            draws += 1;
            if !request.is_feasible(&x) {
                continue;
            }
            if self.deduplicate
                && (request.generated_points.contains(&x) || accepted.contains(&x))
            {
                continue;
            }
            accepted.push(x);
        }
        debug!("Rejection sampling accepted {} of {} draws", accepted.len(), draws);

        let mut metadata = serde_json::Map::new();
        if accepted.len() < request.n {
            match request.linear_constraints {
                Some(constraints)
                    if request.model_gen_options.fallback_to_polytope && !constraints.is_empty() =>
                {
                    let seed = self.seed.wrapping_add(request.generated_points.len() as u64);
                    warn!(
                        "Rejection sampling exceeded specified maximum draws ({}); falling back to polytope sampling with seed {}",
                        max_draws, seed
                    );
                    let missing = request.n - accepted.len();
                    accepted.extend(self.sample_polytope(request, constraints, seed, missing)?);
                    metadata.insert("polytope_seed".to_string(), seed.into());
                }
                _ => {
                    return Err(GeneratorError::SearchSpaceExhausted {
                        message: format!(
                            "Rejection sampling error (specified maximum draws ({}) exhausted, without finding sufficiently many ({}) candidates). This likely means that there are no new points left in the search space.",
                            max_draws, request.n
                        ),
                    })
                }
            }
        }

        let mut generated = GeneratedPoints::unit_weights(accepted);
        generated.metadata = metadata;
        Ok(generated)
    }

    fn state(&self) -> serde_json::Value {
        serde_json::json!({
            "seed": self.seed,
            "init_position": self.init_position,
        })
    }
}

/// Radical inverse of `index` in `base`.
fn halton(mut index: u64, base: u64) -> f64 {
    let mut result = 0.0;
    let mut f = 1.0 / base as f64;
    while index > 0 {
        result += f * (index % base) as f64;
        index /= base;
        f /= base as f64;
    }
    result
}

fn first_primes(n: usize) -> Vec<u64> {
    let mut primes: Vec<u64> = Vec::with_capacity(n);
    let mut candidate = 2;
    while primes.len() < n {
        if primes.iter().all(|p| candidate % p != 0) {
            primes.push(candidate);
        }
        candidate += 1;
    }
    primes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GenOptions;
    use std::collections::BTreeMap;

    fn seeded(seed: u64) -> UniformGenerator {
        UniformGenerator::new(&UniformGeneratorConfig::default().with_seed(seed))
    }

    fn unit(d: usize) -> Vec<(f64, f64)> {
        vec![(0.0, 1.0); d]
    }

    #[test]
    fn all_tunable() {
        let mut generator = seeded(0);
        let bounds = unit(3);
        let options = GenOptions::default();
        let out = generator.gen(&GenRequest::new(3, &bounds, &options)).unwrap();
        assert_eq!(out.points.len(), 3);
        assert!(out.points.iter().flatten().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(out.weights, vec![1.0; 3]);

        let state: GeneratorState = serde_json::from_value(generator.state()).unwrap();
        assert_eq!(state, GeneratorState { seed: 0, init_position: 3 });
    }

    #[test]
    fn fully_fixed_space_is_exhausted_when_deduplicating() {
        let bounds = unit(2);
        let options = GenOptions::default();
        let fixed = BTreeMap::from([(0, 0.25), (1, 0.75)]);
        let request = GenRequest::new(3, &bounds, &options).with_fixed_features(&fixed);

        let mut no_dedup =
            UniformGenerator::new(&UniformGeneratorConfig::default().with_seed(0).with_deduplicate(false));
        let out = no_dedup.gen(&request).unwrap();
        assert_eq!(out.points, vec![vec![0.25, 0.75]; 3]);

        let mut dedup = seeded(0);
        let err = dedup.gen(&request).unwrap_err();
        assert!(err.to_string().contains("Rejection sampling"));

        let single = GenRequest::new(1, &bounds, &options).with_fixed_features(&fixed);
        let first = dedup.gen(&single).unwrap();
        assert_eq!(first.points.len(), 1);
        let again = single.with_generated_points(&first.points);
        assert!(matches!(
            dedup.gen(&again),
            Err(GeneratorError::SearchSpaceExhausted { .. })
        ));
    }

    #[test]
    fn online_matches_bulk() {
        let bounds = unit(4);
        let options = GenOptions::default();
        let fixed = BTreeMap::from([(3, 1.0)]);
        let bulk = seeded(0)
            .gen(&GenRequest::new(3, &bounds, &options).with_fixed_features(&fixed))
            .unwrap();

        let mut generator = seeded(0);
        let mut all: Vec<Vec<f64>> = Vec::new();
        for expected in &bulk.points {
            let out = generator
                .gen(
                    &GenRequest::new(1, &bounds, &options)
                        .with_fixed_features(&fixed)
                        .with_generated_points(&all),
                )
                .unwrap();
            assert_eq!(out.weights, vec![1.0]);
            assert_eq!(out.points[0][3], 1.0);
            assert_eq!(&out.points[0], expected);
            all.extend(out.points);
        }
    }

    #[test]
    fn order_constraints_are_respected() {
        let bounds = unit(4);
        let options = GenOptions::default();
        let fixed = BTreeMap::from([(3, 0.5)]);
        let constraints = LinearConstraints::new(
            vec![
                vec![1.0, -1.0, 0.0, 0.0],
                vec![0.0, 1.0, -1.0, 0.0],
                vec![0.0, 0.0, 1.0, -1.0],
            ],
            vec![0.0, 0.0, 0.0],
        );
        let out = seeded(0)
            .gen(
                &GenRequest::new(3, &bounds, &options)
                    .with_fixed_features(&fixed)
                    .with_linear_constraints(&constraints),
            )
            .unwrap();
        for p in &out.points {
            assert_eq!(p[3], 0.5);
            assert!(p[0] <= p[1] && p[1] <= p[2] && p[2] <= 0.5);
        }
    }

    #[test]
    fn max_draws_of_zero_exhausts() {
        let bounds = unit(4);
        let options = GenOptions::default().with_max_rs_draws(0);
        let constraints = LinearConstraints::new(
            vec![vec![1.0, 1.0, 0.0, 0.0], vec![0.0, 1.0, 1.0, 0.0]],
            vec![1.0, 1.0],
        );
        let err = seeded(0)
            .gen(&GenRequest::new(3, &bounds, &options).with_linear_constraints(&constraints))
            .unwrap_err();
        assert!(matches!(err, GeneratorError::SearchSpaceExhausted { .. }));
    }

    #[test]
    fn falls_back_to_polytope_sampling() {
        let bounds = unit(10);
        let options = GenOptions::default().with_fallback_to_polytope(true);
        let constraints = LinearConstraints::new(vec![vec![1.0; 10]], vec![1.0]);
        let mut generator = seeded(0);

        let first = generator
            .gen(&GenRequest::new(3, &bounds, &options).with_linear_constraints(&constraints))
            .unwrap();
        assert_eq!(first.points.len(), 3);
        assert!(first.points.iter().all(|p| constraints.is_satisfied(p)));
        assert_eq!(first.metadata["polytope_seed"], 0);

        let second = generator
            .gen(
                &GenRequest::new(3, &bounds, &options)
                    .with_linear_constraints(&constraints)
                    .with_generated_points(&first.points),
            )
            .unwrap();
        assert_eq!(second.metadata["polytope_seed"], 3);
    }

    #[test]
    fn resumption_is_exact_for_every_split() {
        let bounds = unit(4);
        let options = GenOptions::default();
        let fixed = BTreeMap::from([(3, 1.0)]);
        let k = 5;
        let single = seeded(0)
            .gen(&GenRequest::new(k, &bounds, &options).with_fixed_features(&fixed))
            .unwrap();

        for j in 0..=k {
            let mut first_gen = seeded(0);
            let first = first_gen
                .gen(&GenRequest::new(j, &bounds, &options).with_fixed_features(&fixed))
                .unwrap();
            let config = UniformGeneratorConfig::default();
            let state = GeneratorState {
                seed: 0,
                init_position: first_gen.init_position(),
            };
            let second = UniformGenerator::from_state(&config, state)
                .gen(
                    &GenRequest::new(k - j, &bounds, &options)
                        .with_fixed_features(&fixed)
                        .with_generated_points(&first.points),
                )
                .unwrap();
            let combined: Vec<Vec<f64>> = first.points.into_iter().chain(second.points).collect();
            assert_eq!(combined, single.points, "split at {j}");
        }
    }

    #[test]
    fn unscrambled_halton_starts_at_the_radical_inverse() {
        let config = UniformGeneratorConfig::default()
            .with_seed(1)
            .with_scheme(SamplingScheme::Halton)
            .with_scramble(false);
        let bounds = unit(2);
        let options = GenOptions::default();
        let out = UniformGenerator::new(&config)
            .gen(&GenRequest::new(4, &bounds, &options))
            .unwrap();
        assert_eq!(out.points[0], vec![0.5, 1.0 / 3.0]);
        assert_eq!(out.points[1], vec![0.25, 2.0 / 3.0]);
    }

    #[test]
    fn rejects_non_unit_bounds() {
        let bounds = vec![(-1.0, 1.0)];
        let options = GenOptions::default();
        let err = seeded(0).gen(&GenRequest::new(1, &bounds, &options)).unwrap_err();
        assert!(err.to_string().contains("This generator operates on"));
    }
}
