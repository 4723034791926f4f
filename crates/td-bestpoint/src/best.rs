//! Recommending parameterizations from observed (or modeled) outcomes.

use crate::pareto::{hypervolume, infer_thresholds, pareto_frontier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use td_experiment::{Experiment, STATUS_QUO_ARM_NAME};
use td_generation::GenerationStrategy;
use td_types::{
    derelativize, BestPointError, ComparisonOp, Objective, ObjectiveThreshold, Parameterization,
    ProblemConfig, TdResult,
};
use tracing::{debug, warn};

/// Outcome means of one arm in one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedPoint {
    pub trial_index: usize,
    pub arm_name: String,
    pub parameters: Parameterization,
    pub means: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPoint {
    pub point: ObservedPoint,
    pub objective_value: f64,
    /// Whether `point.means` are model predictions rather than observations.
    pub from_model: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParetoFrontier {
    pub points: Vec<ObservedPoint>,
    /// Absolute thresholds used for the box and the hypervolume, one per
    /// objective.
    pub thresholds: Vec<ObjectiveThreshold>,
    /// Set when at least one threshold was inferred from the data; inferred
    /// thresholds move as more data arrives.
    pub thresholds_inferred: bool,
    pub hypervolume: f64,
    pub from_model: bool,
}

/// Arms of completed and early-stopped trials with their observed means.
pub fn observed_points(experiment: &Experiment) -> Vec<ObservedPoint> {
    let mut points = Vec::new();
    for trial in experiment.trials() {
        if !trial.status().has_usable_data() {
            continue;
        }
        let Some(data) = experiment.lookup_data(trial.index()) else {
            continue;
        };
        let means = data.means_by_arm();
        for arm in trial.arms() {
            if let Some(arm_means) = means.get(&arm.name) {
                points.push(ObservedPoint {
                    trial_index: trial.index(),
                    arm_name: arm.name.clone(),
                    parameters: arm.parameters.clone(),
                    means: arm_means.clone(),
                });
            }
        }
    }
    points
}

/// Observed means of the status quo arm, if it has any.
pub fn status_quo_means(experiment: &Experiment) -> Option<BTreeMap<String, f64>> {
    experiment.status_quo()?;
    experiment
        .completed_data()
        .means_by_arm()
        .remove(STATUS_QUO_ARM_NAME)
}

enum Bound {
    Single { metric: String, op: ComparisonOp, bound: f64 },
    Scalarized { index: usize, op: ComparisonOp, bound: f64 },
}

/// Outcome constraints with relative bounds resolved against the status quo.
struct Feasibility<'a> {
    config: &'a ProblemConfig,
    bounds: Vec<Bound>,
}

impl<'a> Feasibility<'a> {
    fn new(
        config: &'a ProblemConfig,
        status_quo: Option<&BTreeMap<String, f64>>,
    ) -> Result<Self, BestPointError> {
        let mut bounds = Vec::new();
        for c in config.outcome_constraints() {
            let sq = status_quo.and_then(|m| m.get(&c.metric.name)).copied();
            let bound = c
                .absolute_bound(sq)
                .ok_or_else(|| BestPointError::MissingStatusQuoData {
                    metric: c.metric.name.clone(),
                })?;
            bounds.push(Bound::Single {
                metric: c.metric.name.clone(),
                op: c.op,
                bound,
            });
        }
        for (index, c) in config.scalarized_outcome_constraints().iter().enumerate() {
            let bound = if c.relative() {
                let sq = status_quo.and_then(|m| c.value(m)).ok_or_else(|| {
                    BestPointError::MissingStatusQuoData {
                        metric: c.metrics().iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join("+"),
                    }
                })?;
                derelativize(c.bound(), sq)
            } else {
                c.bound()
            };
            bounds.push(Bound::Scalarized {
                index,
                op: c.op(),
                bound,
            });
        }
        Ok(Self { config, bounds })
    }

    /// Points missing a constrained metric are infeasible.
    fn admits(&self, means: &BTreeMap<String, f64>) -> bool {
        self.bounds.iter().all(|b| match b {
            Bound::Single { metric, op, bound } => {
                means.get(metric).is_some_and(|&v| op.holds(v, *bound))
            }
            Bound::Scalarized { index, op, bound } => self.config.scalarized_outcome_constraints()
                [*index]
                .value(means)
                .is_some_and(|v| op.holds(v, *bound)),
        })
    }
}

/// Feasible point with the best scalar objective value.
///
/// Ties go to the earliest point. Fails for multi-objective configs.
pub fn best_point(
    config: &ProblemConfig,
    points: &[ObservedPoint],
    status_quo: Option<&BTreeMap<String, f64>>,
) -> Result<Option<BestPoint>, BestPointError> {
    let objective = config.objective();
    let Some(minimize) = objective.minimize() else {
        return Err(BestPointError::MultiObjectiveNotSupported);
    };
    let feasibility = Feasibility::new(config, status_quo)?;

    let mut best: Option<(f64, &ObservedPoint)> = None;
    for point in points.iter().filter(|p| feasibility.admits(&p.means)) {
        let Some(value) = objective.scalar_value(&point.means) else {
            continue;
        };
        let improves = best.map_or(true, |(incumbent, _)| {
            if minimize {
                value < incumbent
            } else {
                value > incumbent
            }
        });
        if improves {
            best = Some((value, point));
        }
    }
    Ok(best.map(|(objective_value, point)| BestPoint {
        point: point.clone(),
        objective_value,
        from_model: false,
    }))
}

/// Non-dominated feasible points inside the threshold box.
///
/// Objectives without a configured threshold get one inferred from the
/// feasible points.
pub fn pareto_optimal_points(
    config: &ProblemConfig,
    points: &[ObservedPoint],
    status_quo: Option<&BTreeMap<String, f64>>,
) -> Result<ParetoFrontier, BestPointError> {
    let Objective::Multi(multi) = config.objective() else {
        return Err(BestPointError::NotMultiObjective);
    };
    let feasibility = Feasibility::new(config, status_quo)?;
    let objectives = multi.objectives();
    let minimize: Vec<bool> = objectives.iter().map(|o| o.minimize()).collect();

    let (candidates, values): (Vec<&ObservedPoint>, Vec<Vec<f64>>) = points
        .iter()
        .filter(|p| feasibility.admits(&p.means))
        .filter_map(|p| {
            let y: Option<Vec<f64>> = objectives
                .iter()
                .map(|o| p.means.get(&o.metric().name).copied())
                .collect();
            y.map(|y| (p, y))
        })
        .unzip();

    let configured: BTreeMap<&str, &ObjectiveThreshold> = config
        .objective_thresholds()
        .iter()
        .map(|t| (t.metric.name.as_str(), t))
        .collect();
    let inferred = if objectives.iter().all(|o| configured.contains_key(o.metric().name.as_str())) {
        None
    } else {
        infer_thresholds(&values, &minimize)
    };

    let mut thresholds = Vec::with_capacity(objectives.len());
    let mut thresholds_inferred = false;
    for (k, objective) in objectives.iter().enumerate() {
        let name = objective.metric().name.as_str();
        let expected_op = if objective.minimize() {
            ComparisonOp::Leq
        } else {
            ComparisonOp::Geq
        };
        let bound = match configured.get(name) {
            Some(t) => {
                if t.op != expected_op {
                    return Err(BestPointError::MisalignedThreshold {
                        metric: name.to_string(),
                        op: t.op,
                    });
                }
                let sq = status_quo.and_then(|m| m.get(name)).copied();
                t.absolute_bound(sq)
                    .ok_or_else(|| BestPointError::MissingStatusQuoData {
                        metric: name.to_string(),
                    })?
            }
            None => {
                thresholds_inferred = true;
                match &inferred {
                    Some(inferred) => inferred[k],
                    None => {
                        debug!("No feasible observations of {}; nothing to infer a threshold from", name);
                        return Ok(ParetoFrontier {
                            points: Vec::new(),
                            thresholds: Vec::new(),
                            thresholds_inferred,
                            hypervolume: 0.0,
                            from_model: false,
                        });
                    }
                }
            }
        };
        thresholds.push(ObjectiveThreshold::new(
            objective.metric().clone(),
            bound,
            expected_op,
            false,
        ));
    }

    let (boxed, boxed_values): (Vec<&ObservedPoint>, Vec<Vec<f64>>) = candidates
        .into_iter()
        .zip(values)
        .filter(|(_, y)| thresholds.iter().zip(y).all(|(t, &v)| t.op.holds(v, t.bound)))
        .unzip();
    let frontier = pareto_frontier(&boxed_values, &minimize);
    let reference: Vec<f64> = thresholds.iter().map(|t| t.bound).collect();
    let frontier_values: Vec<Vec<f64>> = frontier.iter().map(|&i| boxed_values[i].clone()).collect();

    Ok(ParetoFrontier {
        points: frontier.iter().map(|&i| boxed[i].clone()).collect(),
        hypervolume: hypervolume(&frontier_values, &reference, &minimize),
        thresholds,
        thresholds_inferred,
        from_model: false,
    })
}

/// Replace observed means with the strategy's model predictions.
fn predicted_points(
    experiment: &Experiment,
    strategy: &GenerationStrategy,
    points: &[ObservedPoint],
    required: &[&str],
) -> TdResult<Option<Vec<ObservedPoint>>> {
    let parameterizations: Vec<Parameterization> = points.iter().map(|p| p.parameters.clone()).collect();
    let Some(predictions) = strategy.predict(experiment, &parameterizations)? else {
        return Ok(None);
    };
    let mut predicted = Vec::with_capacity(points.len());
    for (point, means) in points.iter().zip(predictions) {
        if let Some(missing) = required.iter().find(|m| !means.contains_key(**m)) {
            return Err(BestPointError::MissingMetric {
                arm: point.arm_name.clone(),
                metric: missing.to_string(),
            }
            .into());
        }
        predicted.push(ObservedPoint {
            means,
            ..point.clone()
        });
    }
    Ok(Some(predicted))
}

/// Points to select from: model predictions when asked for and available,
/// observations otherwise.
fn selection_points(
    experiment: &Experiment,
    strategy: Option<&GenerationStrategy>,
    use_model_predictions: bool,
    config: &ProblemConfig,
) -> (Vec<ObservedPoint>, bool) {
    let observed = observed_points(experiment);
    let Some(strategy) = strategy.filter(|_| use_model_predictions) else {
        return (observed, false);
    };
    let metrics = config.metrics();
    let required: Vec<&str> = metrics.keys().map(String::as_str).collect();
    match predicted_points(experiment, strategy, &observed, &required) {
        Ok(Some(predicted)) => (predicted, true),
        Ok(None) => {
            debug!(
                "Generation node {} has no model; using observed data",
                strategy.current_node_name()
            );
            (observed, false)
        }
        Err(e) => {
            warn!("Model predictions unavailable ({}); using observed data", e);
            (observed, false)
        }
    }
}

/// Best parameterization of a single-objective experiment.
///
/// `Ok(None)` when the experiment has no optimization config or no feasible
/// observation.
pub fn get_best_parameters(
    experiment: &Experiment,
    strategy: Option<&GenerationStrategy>,
    use_model_predictions: bool,
) -> TdResult<Option<BestPoint>> {
    let Some(config) = experiment.optimization_config() else {
        return Ok(None);
    };
    if config.is_moo_problem() {
        return Err(BestPointError::MultiObjectiveNotSupported.into());
    }
    let (points, from_model) = selection_points(experiment, strategy, use_model_predictions, config);
    let status_quo = status_quo_means(experiment);
    let best = best_point(config, &points, status_quo.as_ref())?;
    Ok(best.map(|b| BestPoint { from_model, ..b }))
}

/// Pareto-optimal parameterizations of a multi-objective experiment.
pub fn get_pareto_optimal_parameters(
    experiment: &Experiment,
    strategy: Option<&GenerationStrategy>,
    use_model_predictions: bool,
) -> TdResult<ParetoFrontier> {
    let config = experiment
        .optimization_config()
        .ok_or(BestPointError::NotMultiObjective)?;
    let (points, from_model) = selection_points(experiment, strategy, use_model_predictions, config);
    let status_quo = status_quo_means(experiment);
    let frontier = pareto_optimal_points(config, &points, status_quo.as_ref())?;
    if frontier.thresholds_inferred {
        debug!("Pareto frontier computed against inferred objective thresholds");
    }
    Ok(ParetoFrontier { from_model, ..frontier })
}
