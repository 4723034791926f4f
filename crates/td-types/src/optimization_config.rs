//! Validated optimization configurations.
//!
//! Both config types are immutable once built. Each `with_*` method builds a
//! new config through the same validation as the constructor and leaves the
//! receiver untouched.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::ConfigError;
use crate::metric::Metric;
use crate::objective::{MultiObjective, Objective};
use crate::outcome_constraint::{
    ObjectiveThreshold, OutcomeConstraint, RiskMeasure, ScalarizedOutcomeConstraint,
};
use crate::types::ComparisonOp;

/// How a metric takes part in an optimization config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum MetricIntent {
    Tracking,
    Objective {
        minimize: bool,
    },
    MultiObjective {
        minimize: bool,
    },
    ScalarizedObjective {
        weight: f64,
        minimize: bool,
    },
    OutcomeConstraint {
        op: ComparisonOp,
        bound: f64,
        relative: bool,
    },
    ScalarizedOutcomeConstraint {
        weight: f64,
        op: ComparisonOp,
        bound: f64,
        relative: bool,
    },
    ObjectiveThreshold {
        op: ComparisonOp,
        bound: f64,
        relative: bool,
    },
    RiskMeasure {
        options: serde_json::Map<String, serde_json::Value>,
    },
}

/// Config for a single or scalarized objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOptimizationConfig")]
pub struct OptimizationConfig {
    objective: Objective,
    outcome_constraints: Vec<OutcomeConstraint>,
    scalarized_outcome_constraints: Vec<ScalarizedOutcomeConstraint>,
    risk_measure: Option<RiskMeasure>,
}

#[derive(Deserialize)]
struct RawOptimizationConfig {
    objective: Objective,
    #[serde(default)]
    outcome_constraints: Vec<OutcomeConstraint>,
    #[serde(default)]
    scalarized_outcome_constraints: Vec<ScalarizedOutcomeConstraint>,
    #[serde(default)]
    risk_measure: Option<RiskMeasure>,
}

impl TryFrom<RawOptimizationConfig> for OptimizationConfig {
    type Error = ConfigError;

    fn try_from(raw: RawOptimizationConfig) -> Result<Self, Self::Error> {
        Self::new(raw.objective, raw.outcome_constraints)?
            .with_scalarized_outcome_constraints(raw.scalarized_outcome_constraints)?
            .with_risk_measure(raw.risk_measure)
    }
}

impl OptimizationConfig {
    pub fn new(
        objective: Objective,
        outcome_constraints: Vec<OutcomeConstraint>,
    ) -> Result<Self, ConfigError> {
        Self::build(objective, outcome_constraints, Vec::new(), None)
    }

    fn build(
        objective: Objective,
        outcome_constraints: Vec<OutcomeConstraint>,
        scalarized_outcome_constraints: Vec<ScalarizedOutcomeConstraint>,
        risk_measure: Option<RiskMeasure>,
    ) -> Result<Self, ConfigError> {
        if objective.is_multi() {
            return Err(ConfigError::MultiObjectiveInSingleConfig);
        }
        validate_outcome_constraints(&objective, &outcome_constraints)?;
        Ok(Self {
            objective,
            outcome_constraints,
            scalarized_outcome_constraints,
            risk_measure,
        })
    }

    pub fn with_objective(&self, objective: Objective) -> Result<Self, ConfigError> {
        Self::build(
            objective,
            self.outcome_constraints.clone(),
            self.scalarized_outcome_constraints.clone(),
            self.risk_measure.clone(),
        )
    }

    pub fn with_outcome_constraints(
        &self,
        outcome_constraints: Vec<OutcomeConstraint>,
    ) -> Result<Self, ConfigError> {
        Self::build(
            self.objective.clone(),
            outcome_constraints,
            self.scalarized_outcome_constraints.clone(),
            self.risk_measure.clone(),
        )
    }

    pub fn with_scalarized_outcome_constraints(
        &self,
        constraints: Vec<ScalarizedOutcomeConstraint>,
    ) -> Result<Self, ConfigError> {
        Self::build(
            self.objective.clone(),
            self.outcome_constraints.clone(),
            constraints,
            self.risk_measure.clone(),
        )
    }

    pub fn with_risk_measure(&self, risk_measure: Option<RiskMeasure>) -> Result<Self, ConfigError> {
        Self::build(
            self.objective.clone(),
            self.outcome_constraints.clone(),
            self.scalarized_outcome_constraints.clone(),
            risk_measure,
        )
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn outcome_constraints(&self) -> &[OutcomeConstraint] {
        &self.outcome_constraints
    }

    pub fn scalarized_outcome_constraints(&self) -> &[ScalarizedOutcomeConstraint] {
        &self.scalarized_outcome_constraints
    }

    pub fn risk_measure(&self) -> Option<&RiskMeasure> {
        self.risk_measure.as_ref()
    }

    pub fn metrics(&self) -> BTreeMap<String, Metric> {
        collect_metrics(
            &self.objective,
            &self.outcome_constraints,
            &self.scalarized_outcome_constraints,
            &[],
        )
    }

    pub fn intents(&self) -> Vec<(Metric, MetricIntent)> {
        collect_intents(
            &self.objective,
            &self.outcome_constraints,
            &self.scalarized_outcome_constraints,
            &[],
            self.risk_measure.as_ref(),
        )
    }
}

/// Config for multi-objective problems, optionally with objective thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMultiObjectiveOptimizationConfig")]
pub struct MultiObjectiveOptimizationConfig {
    objective: Objective,
    outcome_constraints: Vec<OutcomeConstraint>,
    scalarized_outcome_constraints: Vec<ScalarizedOutcomeConstraint>,
    objective_thresholds: Vec<ObjectiveThreshold>,
    risk_measure: Option<RiskMeasure>,
}

#[derive(Deserialize)]
struct RawMultiObjectiveOptimizationConfig {
    objective: Objective,
    #[serde(default)]
    outcome_constraints: Vec<OutcomeConstraint>,
    #[serde(default)]
    scalarized_outcome_constraints: Vec<ScalarizedOutcomeConstraint>,
    #[serde(default)]
    objective_thresholds: Vec<ObjectiveThreshold>,
    #[serde(default)]
    risk_measure: Option<RiskMeasure>,
}

impl TryFrom<RawMultiObjectiveOptimizationConfig> for MultiObjectiveOptimizationConfig {
    type Error = ConfigError;

    fn try_from(raw: RawMultiObjectiveOptimizationConfig) -> Result<Self, Self::Error> {
        Self::build(
            raw.objective,
            raw.outcome_constraints,
            raw.scalarized_outcome_constraints,
            raw.objective_thresholds,
            raw.risk_measure,
        )
    }
}

impl MultiObjectiveOptimizationConfig {
    pub fn new(
        objective: Objective,
        outcome_constraints: Vec<OutcomeConstraint>,
        objective_thresholds: Vec<ObjectiveThreshold>,
    ) -> Result<Self, ConfigError> {
        Self::build(
            objective,
            outcome_constraints,
            Vec::new(),
            objective_thresholds,
            None,
        )
    }

    fn build(
        objective: Objective,
        outcome_constraints: Vec<OutcomeConstraint>,
        scalarized_outcome_constraints: Vec<ScalarizedOutcomeConstraint>,
        objective_thresholds: Vec<ObjectiveThreshold>,
        risk_measure: Option<RiskMeasure>,
    ) -> Result<Self, ConfigError> {
        if let Objective::Single(_) = objective {
            return Err(ConfigError::SingleObjectiveInMultiConfig);
        }
        if let Objective::Multi(multi) = &objective {
            check_objective_thresholds_match_objectives(multi, &objective_thresholds)?;
        }
        validate_outcome_constraints(&objective, &outcome_constraints)?;
        Ok(Self {
            objective,
            outcome_constraints,
            scalarized_outcome_constraints,
            objective_thresholds,
            risk_measure,
        })
    }

    pub fn with_objective(&self, objective: Objective) -> Result<Self, ConfigError> {
        Self::build(
            objective,
            self.outcome_constraints.clone(),
            self.scalarized_outcome_constraints.clone(),
            self.objective_thresholds.clone(),
            self.risk_measure.clone(),
        )
    }

    pub fn with_outcome_constraints(
        &self,
        outcome_constraints: Vec<OutcomeConstraint>,
    ) -> Result<Self, ConfigError> {
        Self::build(
            self.objective.clone(),
            outcome_constraints,
            self.scalarized_outcome_constraints.clone(),
            self.objective_thresholds.clone(),
            self.risk_measure.clone(),
        )
    }

    pub fn with_scalarized_outcome_constraints(
        &self,
        constraints: Vec<ScalarizedOutcomeConstraint>,
    ) -> Result<Self, ConfigError> {
        Self::build(
            self.objective.clone(),
            self.outcome_constraints.clone(),
            constraints,
            self.objective_thresholds.clone(),
            self.risk_measure.clone(),
        )
    }

    pub fn with_objective_thresholds(
        &self,
        objective_thresholds: Vec<ObjectiveThreshold>,
    ) -> Result<Self, ConfigError> {
        Self::build(
            self.objective.clone(),
            self.outcome_constraints.clone(),
            self.scalarized_outcome_constraints.clone(),
            objective_thresholds,
            self.risk_measure.clone(),
        )
    }

    pub fn with_risk_measure(&self, risk_measure: Option<RiskMeasure>) -> Result<Self, ConfigError> {
        Self::build(
            self.objective.clone(),
            self.outcome_constraints.clone(),
            self.scalarized_outcome_constraints.clone(),
            self.objective_thresholds.clone(),
            risk_measure,
        )
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn outcome_constraints(&self) -> &[OutcomeConstraint] {
        &self.outcome_constraints
    }

    pub fn scalarized_outcome_constraints(&self) -> &[ScalarizedOutcomeConstraint] {
        &self.scalarized_outcome_constraints
    }

    pub fn objective_thresholds(&self) -> &[ObjectiveThreshold] {
        &self.objective_thresholds
    }

    pub fn objective_thresholds_dict(&self) -> BTreeMap<&str, &ObjectiveThreshold> {
        self.objective_thresholds
            .iter()
            .map(|t| (t.metric.name.as_str(), t))
            .collect()
    }

    pub fn risk_measure(&self) -> Option<&RiskMeasure> {
        self.risk_measure.as_ref()
    }

    pub fn metrics(&self) -> BTreeMap<String, Metric> {
        collect_metrics(
            &self.objective,
            &self.outcome_constraints,
            &self.scalarized_outcome_constraints,
            &self.objective_thresholds,
        )
    }

    pub fn intents(&self) -> Vec<(Metric, MetricIntent)> {
        collect_intents(
            &self.objective,
            &self.outcome_constraints,
            &self.scalarized_outcome_constraints,
            &self.objective_thresholds,
            self.risk_measure.as_ref(),
        )
    }
}

/// Either kind of optimization config, as attached to an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProblemConfig {
    Single(OptimizationConfig),
    MultiObjective(MultiObjectiveOptimizationConfig),
}

impl ProblemConfig {
    pub fn objective(&self) -> &Objective {
        match self {
            Self::Single(c) => c.objective(),
            Self::MultiObjective(c) => c.objective(),
        }
    }

    pub fn outcome_constraints(&self) -> &[OutcomeConstraint] {
        match self {
            Self::Single(c) => c.outcome_constraints(),
            Self::MultiObjective(c) => c.outcome_constraints(),
        }
    }

    pub fn scalarized_outcome_constraints(&self) -> &[ScalarizedOutcomeConstraint] {
        match self {
            Self::Single(c) => c.scalarized_outcome_constraints(),
            Self::MultiObjective(c) => c.scalarized_outcome_constraints(),
        }
    }

    pub fn objective_thresholds(&self) -> &[ObjectiveThreshold] {
        match self {
            Self::Single(_) => &[],
            Self::MultiObjective(c) => c.objective_thresholds(),
        }
    }

    /// True when the objective is a `MultiObjective`.
    pub fn is_moo_problem(&self) -> bool {
        self.objective().is_multi()
    }

    pub fn metrics(&self) -> BTreeMap<String, Metric> {
        match self {
            Self::Single(c) => c.metrics(),
            Self::MultiObjective(c) => c.metrics(),
        }
    }

    pub fn intents(&self) -> Vec<(Metric, MetricIntent)> {
        match self {
            Self::Single(c) => c.intents(),
            Self::MultiObjective(c) => c.intents(),
        }
    }

    /// Whether any constraint or threshold is expressed relative to the
    /// status quo. Returns the first such metric.
    pub fn first_relative_metric(&self) -> Option<&str> {
        let constraints = self
            .outcome_constraints()
            .iter()
            .filter(|c| c.relative)
            .map(|c| c.metric.name.as_str());
        let scalarized = self
            .scalarized_outcome_constraints()
            .iter()
            .filter(|c| c.relative())
            .filter_map(|c| c.metrics().first().map(|m| m.name.as_str()));
        let thresholds = self
            .objective_thresholds()
            .iter()
            .filter(|t| t.relative)
            .map(|t| t.metric.name.as_str());
        constraints.chain(scalarized).chain(thresholds).next()
    }
}

impl From<OptimizationConfig> for ProblemConfig {
    fn from(c: OptimizationConfig) -> Self {
        Self::Single(c)
    }
}

impl From<MultiObjectiveOptimizationConfig> for ProblemConfig {
    fn from(c: MultiObjectiveOptimizationConfig) -> Self {
        Self::MultiObjective(c)
    }
}

/// Objective metrics cannot be constrained. A metric may carry one
/// constraint, or two forming a band (`GEQ` bound below the `LEQ` bound).
pub fn validate_outcome_constraints(
    objective: &Objective,
    outcome_constraints: &[OutcomeConstraint],
) -> Result<(), ConfigError> {
    let unconstrainable = objective.unconstrainable_metric_names();
    for constraint in outcome_constraints {
        if unconstrainable.contains(constraint.metric.name.as_str()) {
            return Err(ConfigError::ObjectiveMetricConstrained {
                metric: constraint.metric.name.clone(),
            });
        }
    }

    let mut by_metric: BTreeMap<&str, Vec<&OutcomeConstraint>> = BTreeMap::new();
    for constraint in outcome_constraints {
        by_metric
            .entry(constraint.metric.name.as_str())
            .or_default()
            .push(constraint);
    }

    for (metric, group) in by_metric {
        match group.as_slice() {
            [_] => {}
            [a, b] => {
                if a.op == b.op {
                    return Err(ConfigError::DuplicateOutcomeConstraints {
                        metric: metric.to_string(),
                    });
                }
                let (lower, upper) = if a.op == ComparisonOp::Geq {
                    (a.bound, b.bound)
                } else {
                    (b.bound, a.bound)
                };
                if lower >= upper {
                    return Err(ConfigError::InvertedConstraintBand {
                        metric: metric.to_string(),
                        lower,
                        upper,
                    });
                }
            }
            _ => {
                return Err(ConfigError::DuplicateOutcomeConstraints {
                    metric: metric.to_string(),
                })
            }
        }
    }
    Ok(())
}

/// Each threshold must sit on a distinct objective metric and bound it from
/// the side the objective moves away from.
pub fn check_objective_thresholds_match_objectives(
    objective: &MultiObjective,
    objective_thresholds: &[ObjectiveThreshold],
) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for threshold in objective_thresholds {
        let metric = threshold.metric.name.as_str();
        let Some(single) = objective.objective(metric) else {
            return Err(ConfigError::ThresholdNotOnObjective {
                metric: metric.to_string(),
            });
        };
        if !seen.insert(metric) {
            return Err(ConfigError::DuplicateObjectiveThreshold {
                metric: metric.to_string(),
            });
        }
        let bounded_above = threshold.op == ComparisonOp::Leq;
        if single.minimize() != bounded_above {
            return Err(ConfigError::ThresholdDirectionMismatch {
                metric: metric.to_string(),
                bounds_from: if bounded_above { "above" } else { "below" },
                direction: if single.minimize() {
                    "minimized"
                } else {
                    "maximized"
                },
            });
        }
    }
    Ok(())
}

fn collect_metrics(
    objective: &Objective,
    outcome_constraints: &[OutcomeConstraint],
    scalarized: &[ScalarizedOutcomeConstraint],
    thresholds: &[ObjectiveThreshold],
) -> BTreeMap<String, Metric> {
    let mut metrics = BTreeMap::new();
    for c in outcome_constraints {
        metrics.insert(c.metric.name.clone(), c.metric.clone());
    }
    for c in scalarized {
        for m in c.metrics() {
            metrics.insert(m.name.clone(), m.clone());
        }
    }
    for t in thresholds {
        metrics.insert(t.metric.name.clone(), t.metric.clone());
    }
    // Objective metrics win over constraint copies of the same name.
    for m in objective.metrics() {
        metrics.insert(m.name.clone(), m.clone());
    }
    metrics
}

fn collect_intents(
    objective: &Objective,
    outcome_constraints: &[OutcomeConstraint],
    scalarized: &[ScalarizedOutcomeConstraint],
    thresholds: &[ObjectiveThreshold],
    risk_measure: Option<&RiskMeasure>,
) -> Vec<(Metric, MetricIntent)> {
    let mut intents = Vec::new();
    match objective {
        Objective::Single(o) => intents.push((
            o.metric().clone(),
            MetricIntent::Objective {
                minimize: o.minimize(),
            },
        )),
        Objective::Multi(o) => {
            for single in o.objectives() {
                intents.push((
                    single.metric().clone(),
                    MetricIntent::MultiObjective {
                        minimize: single.minimize(),
                    },
                ));
            }
        }
        Objective::Scalarized(o) => {
            for (metric, weight) in o.metrics().iter().zip(o.weights()) {
                intents.push((
                    metric.clone(),
                    MetricIntent::ScalarizedObjective {
                        weight: *weight,
                        minimize: o.minimize(),
                    },
                ));
            }
        }
    }
    for c in outcome_constraints {
        intents.push((
            c.metric.clone(),
            MetricIntent::OutcomeConstraint {
                op: c.op,
                bound: c.bound,
                relative: c.relative,
            },
        ));
    }
    for c in scalarized {
        for (metric, weight) in c.metrics().iter().zip(c.weights()) {
            intents.push((
                metric.clone(),
                MetricIntent::ScalarizedOutcomeConstraint {
                    weight: *weight,
                    op: c.op(),
                    bound: c.bound(),
                    relative: c.relative(),
                },
            ));
        }
    }
    for t in thresholds {
        intents.push((
            t.metric.clone(),
            MetricIntent::ObjectiveThreshold {
                op: t.op,
                bound: t.bound,
                relative: t.relative,
            },
        ));
    }
    if let Some(risk) = risk_measure {
        intents.push((
            Metric::new(risk.name.clone()),
            MetricIntent::RiskMeasure {
                options: risk.options.clone(),
            },
        ));
    }
    intents
}
