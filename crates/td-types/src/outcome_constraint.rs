//! Constraints on observed outcomes, objective thresholds and risk measures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ConfigError;
use crate::metric::Metric;
use crate::types::ComparisonOp;

/// Absolute bound implied by a relative (percentage) bound given the status
/// quo mean.
pub fn derelativize(bound: f64, status_quo_mean: f64) -> f64 {
    (1.0 + status_quo_mean.signum() * bound / 100.0) * status_quo_mean
}

/// `metric <op> bound`, with the bound optionally a percentage of the status
/// quo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeConstraint {
    pub metric: Metric,
    pub op: ComparisonOp,
    pub bound: f64,
    #[serde(default)]
    pub relative: bool,
}

impl OutcomeConstraint {
    pub fn new(metric: Metric, op: ComparisonOp, bound: f64, relative: bool) -> Self {
        Self {
            metric,
            op,
            bound,
            relative,
        }
    }

    /// Bound in absolute units. Relative bounds need the status quo mean.
    pub fn absolute_bound(&self, status_quo_mean: Option<f64>) -> Option<f64> {
        match (self.relative, status_quo_mean) {
            (false, _) => Some(self.bound),
            (true, Some(sq)) => Some(derelativize(self.bound, sq)),
            (true, None) => None,
        }
    }
}

impl fmt::Display for OutcomeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.relative { "%" } else { "" };
        write!(
            f,
            "OutcomeConstraint({} {} {}{})",
            self.metric.name, self.op, self.bound, suffix
        )
    }
}

/// Bound on a weighted sum of metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawScalarizedOutcomeConstraint")]
pub struct ScalarizedOutcomeConstraint {
    metrics: Vec<Metric>,
    weights: Vec<f64>,
    op: ComparisonOp,
    bound: f64,
    relative: bool,
}

#[derive(Deserialize)]
struct RawScalarizedOutcomeConstraint {
    metrics: Vec<Metric>,
    weights: Vec<f64>,
    op: ComparisonOp,
    bound: f64,
    #[serde(default)]
    relative: bool,
}

impl TryFrom<RawScalarizedOutcomeConstraint> for ScalarizedOutcomeConstraint {
    type Error = ConfigError;

    fn try_from(raw: RawScalarizedOutcomeConstraint) -> Result<Self, Self::Error> {
        Self::new(raw.metrics, raw.weights, raw.op, raw.bound, raw.relative)
    }
}

impl ScalarizedOutcomeConstraint {
    pub fn new(
        metrics: Vec<Metric>,
        weights: Vec<f64>,
        op: ComparisonOp,
        bound: f64,
        relative: bool,
    ) -> Result<Self, ConfigError> {
        if metrics.len() != weights.len() {
            return Err(ConfigError::WeightLengthMismatch {
                metrics: metrics.len(),
                weights: weights.len(),
            });
        }
        Ok(Self {
            metrics,
            weights,
            op,
            bound,
            relative,
        })
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn op(&self) -> ComparisonOp {
        self.op
    }

    pub fn bound(&self) -> f64 {
        self.bound
    }

    pub fn relative(&self) -> bool {
        self.relative
    }

    /// Weighted sum of the metric means, `None` if any is missing.
    pub fn value(&self, means: &BTreeMap<String, f64>) -> Option<f64> {
        self.metrics
            .iter()
            .zip(&self.weights)
            .map(|(m, w)| means.get(&m.name).map(|v| v * w))
            .sum()
    }
}

/// Reference point for one objective in multi-objective problems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveThreshold {
    pub metric: Metric,
    pub bound: f64,
    pub op: ComparisonOp,
    #[serde(default)]
    pub relative: bool,
}

impl ObjectiveThreshold {
    pub fn new(metric: Metric, bound: f64, op: ComparisonOp, relative: bool) -> Self {
        Self {
            metric,
            bound,
            op,
            relative,
        }
    }

    /// Direction inferred from polarity: bounded above when lower is better.
    pub fn from_metric(metric: Metric, bound: f64, relative: bool) -> Self {
        let op = if metric.lower_is_better == Some(true) {
            ComparisonOp::Leq
        } else {
            ComparisonOp::Geq
        };
        Self::new(metric, bound, op, relative)
    }

    pub fn absolute_bound(&self, status_quo_mean: Option<f64>) -> Option<f64> {
        match (self.relative, status_quo_mean) {
            (false, _) => Some(self.bound),
            (true, Some(sq)) => Some(derelativize(self.bound, sq)),
            (true, None) => None,
        }
    }
}

impl fmt::Display for ObjectiveThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.relative { "%" } else { "" };
        write!(
            f,
            "ObjectiveThreshold({} {} {}{})",
            self.metric.name, self.op, self.bound, suffix
        )
    }
}

/// Risk measure for robust optimization. Options are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMeasure {
    pub name: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl RiskMeasure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: serde_json::Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}
