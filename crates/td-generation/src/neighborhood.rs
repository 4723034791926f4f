//! Model-based back-end: an inverse-distance-weighted surrogate that scores
//! perturbations of the best observed point.

use crate::encoding::dot;
use crate::generator::{rng_at, GenRequest, GeneratedPoints, GeneratorBackend, GeneratorState};
use crate::training::TrainingData;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use td_types::GeneratorError;

pub const NEIGHBORHOOD_GENERATOR_KEY: &str = "neighborhood";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborhoodConfig {
    pub seed: Option<u64>,
    /// Half-width of the perturbation box around the incumbent, in encoded units.
    pub radius: f64,
    pub num_candidates: usize,
    /// Probability of drawing a candidate uniformly instead of near the incumbent.
    pub exploration_weight: f64,
    /// Exponent of the inverse-distance weights.
    pub power: f64,
}

impl Default for NeighborhoodConfig {
    fn default() -> Self {
        Self {
            seed: None,
            radius: 0.1,
            num_candidates: 64,
            exploration_weight: 0.1,
            power: 2.0,
        }
    }
}

impl NeighborhoodConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_num_candidates(mut self, num_candidates: usize) -> Self {
        self.num_candidates = num_candidates;
        self
    }

    pub fn with_exploration_weight(mut self, exploration_weight: f64) -> Self {
        self.exploration_weight = exploration_weight;
        self
    }
}

#[derive(Debug, Clone)]
struct FittedPoint {
    point: Vec<f64>,
    means: BTreeMap<String, f64>,
    utility: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NeighborhoodGenerator {
    config: NeighborhoodConfig,
    seed: u64,
    position: u64,
    fitted: Vec<FittedPoint>,
}

impl NeighborhoodGenerator {
    pub fn new(config: &NeighborhoodConfig) -> Self {
        Self {
            seed: config.seed.unwrap_or_else(rand::random),
            position: 0,
            config: config.clone(),
            fitted: Vec::new(),
        }
    }

    pub fn from_state(config: &NeighborhoodConfig, state: GeneratorState) -> Self {
        Self {
            seed: state.seed,
            position: state.init_position,
            ..Self::new(config)
        }
    }

    fn incumbent(&self) -> Option<&FittedPoint> {
        self.fitted
            .iter()
            .filter(|p| p.utility.is_some())
            .fold(None, |best: Option<&FittedPoint>, p| match best {
                Some(b) if b.utility >= p.utility => Some(b),
                _ => Some(p),
            })
    }

    /// Inverse-distance-weighted interpolation of `value` at `x`.
    fn interpolate(&self, x: &[f64], value: impl Fn(&FittedPoint) -> Option<f64>) -> Option<f64> {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for p in &self.fitted {
            let Some(y) = value(p) else {
                continue;
            };
            let diff: Vec<f64> = p.point.iter().zip(x).map(|(a, b)| a - b).collect();
            let distance = dot(&diff, &diff).sqrt();
            if distance < 1e-12 {
                return Some(y);
            }
            let w = distance.powf(-self.config.power);
            weighted += w * y;
            total += w;
        }
        (total > 0.0).then(|| weighted / total)
    }

    fn candidate(&mut self, dim: usize, incumbent: Option<&[f64]>) -> Vec<f64> {
        let mut rng = rng_at(self.seed, self.position);
        self.position += 1;
        let explore = rng.gen::<f64>() < self.config.exploration_weight;
        match incumbent {
            Some(center) if !explore => center
                .iter()
                .map(|v| {
                    let noise = if self.config.radius > 0.0 {
                        rng.gen_range(-self.config.radius..self.config.radius)
                    } else {
                        0.0
                    };
                    (v + noise).clamp(0.0, 1.0)
                })
                .collect(),
            _ => (0..dim).map(|_| rng.gen::<f64>()).collect(),
        }
    }
}

impl GeneratorBackend for NeighborhoodGenerator {
    fn name(&self) -> &str {
        NEIGHBORHOOD_GENERATOR_KEY
    }

    fn fit(&mut self, data: &TrainingData) -> Result<(), GeneratorError> {
        if !data.is_empty() && data.objective_weights.is_empty() {
            return Err(GeneratorError::InsufficientData {
                generator: NEIGHBORHOOD_GENERATOR_KEY.to_string(),
                message: "observed data has no objective to model".to_string(),
            });
        }
        self.fitted = data
            .observations
            .iter()
            .map(|o| FittedPoint {
                point: o.point.clone(),
                means: o.means.clone(),
                utility: data.utility(o),
            })
            .collect();
        Ok(())
    }

    fn gen(&mut self, request: &GenRequest<'_>) -> Result<GeneratedPoints, GeneratorError> {
        request.require_unit_bounds()?;
        let pool = request
            .model_gen_options
            .num_candidates
            .unwrap_or(self.config.num_candidates)
            .max(1);
        let incumbent: Option<Vec<f64>> = self.incumbent().map(|p| p.point.clone());
        let mut accepted: Vec<Vec<f64>> = Vec::with_capacity(request.n);

        for _ in 0..request.n {
            let mut best: Option<(f64, Vec<f64>)> = None;
            for _ in 0..pool {
                let x = request.finish_point(self.candidate(request.dim(), incumbent.as_deref()));
                if !request.is_feasible(&x)
                    || request.generated_points.contains(&x)
                    || accepted.contains(&x)
                {
                    continue;
                }
                let score = self.interpolate(&x, |p| p.utility).unwrap_or(0.0);
                if best.as_ref().map_or(true, |(s, _)| score > *s) {
                    best = Some((score, x));
                }
            }
            match best {
                Some((_, x)) => accepted.push(x),
                None => {
                    return Err(GeneratorError::SearchSpaceExhausted {
                        message: format!(
                            "none of {pool} neighborhood candidates was feasible and new"
                        ),
                    })
                }
            }
        }
        Ok(GeneratedPoints::unit_weights(accepted))
    }

    fn predict(&self, points: &[Vec<f64>]) -> Option<Vec<BTreeMap<String, f64>>> {
        if self.fitted.is_empty() {
            return None;
        }
        let metrics: Vec<String> = {
            let mut names: Vec<String> = self
                .fitted
                .iter()
                .flat_map(|p| p.means.keys().cloned())
                .collect();
            names.sort_unstable();
            names.dedup();
            names
        };
        Some(
            points
                .iter()
                .map(|x| {
                    metrics
                        .iter()
                        .filter_map(|m| {
                            self.interpolate(x, |p| p.means.get(m).copied())
                                .map(|v| (m.clone(), v))
                        })
                        .collect()
                })
                .collect(),
        )
    }

    fn state(&self) -> serde_json::Value {
        serde_json::json!({
            "seed": self.seed,
            "init_position": self.position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GenOptions;
    use crate::training::Observation;

    fn observation(name: &str, x: f64, y: f64) -> Observation {
        Observation {
            arm_name: name.to_string(),
            point: vec![x],
            means: BTreeMap::from([("y".to_string(), y)]),
        }
    }

    fn maximize_y(observations: Vec<Observation>) -> TrainingData {
        TrainingData::new(observations, BTreeMap::from([("y".to_string(), 1.0)]))
    }

    #[test]
    fn explores_without_data() {
        let bounds = vec![(0.0, 1.0); 2];
        let options = GenOptions::default();
        let config = NeighborhoodConfig::default().with_seed(11);
        let a = NeighborhoodGenerator::new(&config)
            .gen(&GenRequest::new(3, &bounds, &options))
            .unwrap();
        let b = NeighborhoodGenerator::new(&config)
            .gen(&GenRequest::new(3, &bounds, &options))
            .unwrap();
        assert_eq!(a.points.len(), 3);
        assert_eq!(a, b);
    }

    #[test]
    fn exploits_around_the_incumbent() {
        let config = NeighborhoodConfig::default()
            .with_seed(5)
            .with_exploration_weight(0.0)
            .with_radius(0.05);
        let mut generator = NeighborhoodGenerator::new(&config);
        generator
            .fit(&maximize_y(vec![
                observation("0_0", 0.2, 1.0),
                observation("1_0", 0.8, 3.0),
            ]))
            .unwrap();

        let bounds = vec![(0.0, 1.0)];
        let options = GenOptions::default();
        let out = generator.gen(&GenRequest::new(4, &bounds, &options)).unwrap();
        for p in &out.points {
            assert!((p[0] - 0.8).abs() <= 0.05, "{p:?} strayed from the incumbent");
        }
    }

    #[test]
    fn predictions_interpolate_observations() {
        let mut generator = NeighborhoodGenerator::new(&NeighborhoodConfig::default().with_seed(0));
        assert!(generator.predict(&[vec![0.5]]).is_none());
        generator
            .fit(&maximize_y(vec![
                observation("0_0", 0.0, 0.0),
                observation("1_0", 1.0, 2.0),
            ]))
            .unwrap();
        let predicted = generator.predict(&[vec![0.0], vec![0.5]]).unwrap();
        assert_eq!(predicted[0]["y"], 0.0);
        assert!((predicted[1]["y"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn needs_an_objective_once_data_exists() {
        let mut generator = NeighborhoodGenerator::new(&NeighborhoodConfig::default());
        let data = TrainingData::new(vec![observation("0_0", 0.5, 1.0)], BTreeMap::new());
        assert!(matches!(
            generator.fit(&data),
            Err(GeneratorError::InsufficientData { .. })
        ));
    }
}
