//! Observed data in the shape back-ends fit on.

use crate::encoding::SearchSpaceEncoding;
use std::collections::BTreeMap;
use td_experiment::Experiment;

/// One observed arm: its encoded point and per-metric means.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub arm_name: String,
    pub point: Vec<f64>,
    pub means: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingData {
    pub observations: Vec<Observation>,
    /// Signed weight per metric; larger weighted sums are better.
    pub objective_weights: BTreeMap<String, f64>,
}

impl TrainingData {
    pub fn new(observations: Vec<Observation>, objective_weights: BTreeMap<String, f64>) -> Self {
        Self {
            observations,
            objective_weights,
        }
    }

    /// Arms of completed and early-stopped trials that carry data.
    pub fn from_experiment(experiment: &Experiment, encoding: &SearchSpaceEncoding) -> Self {
        let means = experiment.completed_data().means_by_arm();
        let mut observations = Vec::new();
        let arms = experiment
            .trials()
            .iter()
            .flat_map(|t| t.arms().iter())
            .chain(experiment.status_quo());
        for arm in arms {
            if observations.iter().any(|o: &Observation| o.arm_name == arm.name) {
                continue;
            }
            if let Some(arm_means) = means.get(&arm.name) {
                observations.push(Observation {
                    arm_name: arm.name.clone(),
                    point: encoding.encode(&arm.parameters),
                    means: arm_means.clone(),
                });
            }
        }
        let objective_weights = experiment
            .optimization_config()
            .map(|c| c.objective().objective_weights())
            .unwrap_or_default();
        Self {
            observations,
            objective_weights,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Weighted objective of one observation; `None` if a metric is missing
    /// or there is no objective.
    pub fn utility(&self, observation: &Observation) -> Option<f64> {
        if self.objective_weights.is_empty() {
            return None;
        }
        self.objective_weights
            .iter()
            .map(|(metric, w)| observation.means.get(metric).map(|m| w * m))
            .sum()
    }

    pub fn metric_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .observations
            .iter()
            .flat_map(|o| o.means.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
