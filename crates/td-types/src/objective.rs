//! Objectives: what an experiment optimizes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::ConfigError;
use crate::metric::Metric;

/// One metric with a direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSingleObjective")]
pub struct SingleObjective {
    metric: Metric,
    minimize: bool,
}

#[derive(Deserialize)]
struct RawSingleObjective {
    metric: Metric,
    minimize: bool,
}

impl TryFrom<RawSingleObjective> for SingleObjective {
    type Error = ConfigError;

    fn try_from(raw: RawSingleObjective) -> Result<Self, Self::Error> {
        Self::new(raw.metric, raw.minimize)
    }
}

impl SingleObjective {
    /// Fails when the metric's declared polarity contradicts `minimize`.
    pub fn new(metric: Metric, minimize: bool) -> Result<Self, ConfigError> {
        check_polarity(&metric, minimize)?;
        Ok(Self { metric, minimize })
    }

    /// Direction taken from the metric's polarity, maximizing when unknown.
    pub fn from_metric(metric: Metric) -> Self {
        let minimize = metric.lower_is_better.unwrap_or(false);
        Self { metric, minimize }
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn minimize(&self) -> bool {
        self.minimize
    }

    /// +1 when maximizing, -1 when minimizing.
    pub fn sign(&self) -> f64 {
        if self.minimize {
            -1.0
        } else {
            1.0
        }
    }
}

/// Several objectives optimized jointly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMultiObjective")]
pub struct MultiObjective {
    objectives: Vec<SingleObjective>,
}

#[derive(Deserialize)]
struct RawMultiObjective {
    objectives: Vec<SingleObjective>,
}

impl TryFrom<RawMultiObjective> for MultiObjective {
    type Error = ConfigError;

    fn try_from(raw: RawMultiObjective) -> Result<Self, Self::Error> {
        Self::new(raw.objectives)
    }
}

impl MultiObjective {
    pub fn new(objectives: Vec<SingleObjective>) -> Result<Self, ConfigError> {
        if objectives.is_empty() {
            return Err(ConfigError::EmptyObjective);
        }
        check_distinct(objectives.iter().map(|o| o.metric.name.as_str()))?;
        Ok(Self { objectives })
    }

    pub fn objectives(&self) -> &[SingleObjective] {
        &self.objectives
    }

    pub fn objective(&self, metric_name: &str) -> Option<&SingleObjective> {
        self.objectives.iter().find(|o| o.metric.name == metric_name)
    }
}

/// Weighted linear combination of metrics treated as one objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawScalarizedObjective")]
pub struct ScalarizedObjective {
    metrics: Vec<Metric>,
    weights: Vec<f64>,
    minimize: bool,
}

#[derive(Deserialize)]
struct RawScalarizedObjective {
    metrics: Vec<Metric>,
    weights: Vec<f64>,
    minimize: bool,
}

impl TryFrom<RawScalarizedObjective> for ScalarizedObjective {
    type Error = ConfigError;

    fn try_from(raw: RawScalarizedObjective) -> Result<Self, Self::Error> {
        Self::new(raw.metrics, raw.weights, raw.minimize)
    }
}

impl ScalarizedObjective {
    pub fn new(metrics: Vec<Metric>, weights: Vec<f64>, minimize: bool) -> Result<Self, ConfigError> {
        if metrics.is_empty() {
            return Err(ConfigError::EmptyObjective);
        }
        if metrics.len() != weights.len() {
            return Err(ConfigError::WeightLengthMismatch {
                metrics: metrics.len(),
                weights: weights.len(),
            });
        }
        check_distinct(metrics.iter().map(|m| m.name.as_str()))?;
        Ok(Self {
            metrics,
            weights,
            minimize,
        })
    }

    /// Equal weights.
    pub fn uniform(metrics: Vec<Metric>, minimize: bool) -> Result<Self, ConfigError> {
        let weights = vec![1.0; metrics.len()];
        Self::new(metrics, weights, minimize)
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn minimize(&self) -> bool {
        self.minimize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Objective {
    Single(SingleObjective),
    Multi(MultiObjective),
    Scalarized(ScalarizedObjective),
}

impl Objective {
    pub fn metrics(&self) -> Vec<&Metric> {
        match self {
            Self::Single(o) => vec![&o.metric],
            Self::Multi(o) => o.objectives.iter().map(|s| &s.metric).collect(),
            Self::Scalarized(o) => o.metrics.iter().collect(),
        }
    }

    pub fn metric_names(&self) -> Vec<&str> {
        self.metrics().into_iter().map(|m| m.name.as_str()).collect()
    }

    /// Metrics that outcome constraints may not reference.
    pub fn unconstrainable_metric_names(&self) -> BTreeSet<&str> {
        self.metric_names().into_iter().collect()
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }

    /// Signed weight per metric such that larger weighted sums are better.
    pub fn objective_weights(&self) -> BTreeMap<String, f64> {
        match self {
            Self::Single(o) => BTreeMap::from([(o.metric.name.clone(), o.sign())]),
            Self::Multi(o) => o
                .objectives
                .iter()
                .map(|s| (s.metric.name.clone(), s.sign()))
                .collect(),
            Self::Scalarized(o) => {
                let sign = if o.minimize { -1.0 } else { 1.0 };
                o.metrics
                    .iter()
                    .zip(&o.weights)
                    .map(|(m, w)| (m.name.clone(), sign * w))
                    .collect()
            }
        }
    }

    /// Value of a single or scalarized objective from per-metric means.
    ///
    /// `None` for multi-objective or when a metric is missing.
    pub fn scalar_value(&self, means: &BTreeMap<String, f64>) -> Option<f64> {
        match self {
            Self::Single(o) => means.get(&o.metric.name).copied(),
            Self::Multi(_) => None,
            Self::Scalarized(o) => o
                .metrics
                .iter()
                .zip(&o.weights)
                .map(|(m, w)| means.get(&m.name).map(|v| v * w))
                .sum(),
        }
    }

    /// Direction of the scalar objective; `None` for multi-objective.
    pub fn minimize(&self) -> Option<bool> {
        match self {
            Self::Single(o) => Some(o.minimize),
            Self::Multi(_) => None,
            Self::Scalarized(o) => Some(o.minimize),
        }
    }
}

impl From<SingleObjective> for Objective {
    fn from(o: SingleObjective) -> Self {
        Self::Single(o)
    }
}

impl From<MultiObjective> for Objective {
    fn from(o: MultiObjective) -> Self {
        Self::Multi(o)
    }
}

impl From<ScalarizedObjective> for Objective {
    fn from(o: ScalarizedObjective) -> Self {
        Self::Scalarized(o)
    }
}

fn check_polarity(metric: &Metric, minimize: bool) -> Result<(), ConfigError> {
    match metric.lower_is_better {
        Some(lower_is_better) if lower_is_better != minimize => Err(ConfigError::PolarityMismatch {
            metric: metric.name.clone(),
            minimize,
            lower_is_better,
        }),
        _ => Ok(()),
    }
}

fn check_distinct<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateObjectiveMetric {
                metric: name.to_string(),
            });
        }
    }
    Ok(())
}
