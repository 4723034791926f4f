use std::collections::BTreeMap;

use td_bestpoint::{get_best_parameters, get_pareto_optimal_parameters};
use td_experiment::{Data, Evaluation, Experiment, STATUS_QUO_ARM_NAME};
use td_generation::{
    GenerationStepConfig, GenerationStrategy, GenerationStrategyConfig, GeneratorSpec,
    NeighborhoodConfig, TrialBudget, UniformGeneratorConfig,
};
use td_types::{
    BestPointError, ComparisonOp, Metric, MultiObjective, MultiObjectiveOptimizationConfig,
    OptimizationConfig, OutcomeConstraint, ParameterValue, Parameterization, RangeParameter,
    SearchSpace, SingleObjective, TdError,
};

fn space() -> SearchSpace {
    SearchSpace::new(vec![RangeParameter::float("x", 0.0, 1.0).unwrap().into()], vec![]).unwrap()
}

fn x(value: f64) -> Parameterization {
    [("x".to_string(), ParameterValue::Float(value))].into()
}

fn observe(experiment: &mut Experiment, parameters: Parameterization, metrics: &[(&str, f64)]) -> usize {
    let (arms, index) = experiment.attach_trial(vec![parameters], None).unwrap();
    let arm = arms.keys().next().unwrap().clone();
    let evaluation: Evaluation = metrics
        .iter()
        .map(|(m, v)| (m.to_string(), (*v, None)))
        .collect();
    let data = Data::from_evaluations(index, &BTreeMap::from([(arm, evaluation)]));
    experiment.complete_trial(index, Some(data)).unwrap();
    index
}

fn minimize_loss() -> OptimizationConfig {
    let objective = SingleObjective::new(Metric::new("loss"), true).unwrap();
    OptimizationConfig::new(objective.into(), vec![]).unwrap()
}

#[test]
fn best_observed_arm() {
    let mut experiment = Experiment::new("single", space())
        .with_optimization_config(minimize_loss())
        .unwrap();
    assert!(get_best_parameters(&experiment, None, false).unwrap().is_none());

    observe(&mut experiment, x(0.1), &[("loss", 0.7)]);
    let winner = observe(&mut experiment, x(0.4), &[("loss", 0.2)]);
    observe(&mut experiment, x(0.9), &[("loss", 0.5)]);

    let best = get_best_parameters(&experiment, None, false).unwrap().unwrap();
    assert_eq!(best.point.trial_index, winner);
    assert_eq!(best.point.parameters, x(0.4));
    assert_eq!(best.objective_value, 0.2);
    assert!(!best.from_model);
}

#[test]
fn model_predictions_fall_back_to_observations() {
    let mut experiment = Experiment::new("modeled", space())
        .with_optimization_config(minimize_loss())
        .unwrap();
    let mut strategy = GenerationStrategy::new(GenerationStrategyConfig::new(vec![
        GenerationStepConfig::new(
            GeneratorSpec::Uniform(UniformGeneratorConfig::default().with_seed(4)),
            TrialBudget::Exactly(3),
        ),
        GenerationStepConfig::new(
            GeneratorSpec::Neighborhood(NeighborhoodConfig::default().with_seed(4)),
            TrialBudget::Unlimited,
        ),
    ]))
    .unwrap();

    let next = strategy.get_next_trials(&mut experiment, 3, None).unwrap();
    for (&index, loss) in next.trials.keys().zip([0.7, 0.2, 0.5]) {
        let arm = experiment.trial(index).unwrap().arms()[0].name.clone();
        let data = Data::from_evaluations(
            index,
            &BTreeMap::from([(arm, Evaluation::from([("loss".to_string(), (loss, None))]))]),
        );
        experiment.complete_trial(index, Some(data)).unwrap();
    }

    // The uniform node has no model.
    let observed = get_best_parameters(&experiment, Some(&strategy), true).unwrap().unwrap();
    assert!(!observed.from_model);
    assert_eq!(observed.point.trial_index, 1);

    strategy.get_next_trials(&mut experiment, 1, None).unwrap();
    assert_eq!(strategy.current_node_name(), "GenerationStep_1");
    let modeled = get_best_parameters(&experiment, Some(&strategy), true).unwrap().unwrap();
    assert!(modeled.from_model);
    assert_eq!(modeled.point.trial_index, 1);
    assert_eq!(modeled.objective_value, 0.2);
}

#[test]
fn relative_constraint_uses_the_status_quo() {
    let objective = SingleObjective::new(Metric::new("loss"), true).unwrap();
    let cost = OutcomeConstraint::new(Metric::new("cost"), ComparisonOp::Leq, 10.0, true);
    let mut experiment = Experiment::new("relative", space())
        .with_status_quo(x(0.5))
        .unwrap()
        .with_optimization_config(OptimizationConfig::new(objective.into(), vec![cost]).unwrap())
        .unwrap();

    observe(&mut experiment, x(0.2), &[("loss", 0.1), ("cost", 5.0)]);
    let err = get_best_parameters(&experiment, None, false).unwrap_err();
    assert!(matches!(
        err,
        TdError::BestPoint(BestPointError::MissingStatusQuoData { .. })
    ));

    let sq = observe(&mut experiment, x(0.5), &[("loss", 0.6), ("cost", 4.0)]);
    assert_eq!(experiment.trial(sq).unwrap().arms()[0].name, STATUS_QUO_ARM_NAME);
    let within = observe(&mut experiment, x(0.7), &[("loss", 0.3), ("cost", 4.2)]);

    let best = get_best_parameters(&experiment, None, false).unwrap().unwrap();
    assert_eq!(best.point.trial_index, within);
}

#[test]
fn pareto_frontier_of_three_known_points() {
    let objective = MultiObjective::new(vec![
        SingleObjective::new(Metric::new("a"), false).unwrap(),
        SingleObjective::new(Metric::new("b"), false).unwrap(),
    ])
    .unwrap();
    let config = MultiObjectiveOptimizationConfig::new(objective.into(), vec![], vec![]).unwrap();
    let mut experiment = Experiment::new("moo", space())
        .with_optimization_config(config)
        .unwrap();
    for (i, (a, b)) in [(10.0, 12.0), (11.0, 10.0), (12.0, 11.0)].into_iter().enumerate() {
        observe(&mut experiment, x(0.1 * (i + 1) as f64), &[("a", a), ("b", b)]);
    }

    let frontier = get_pareto_optimal_parameters(&experiment, None, false).unwrap();
    let indices: Vec<usize> = frontier.points.iter().map(|p| p.trial_index).collect();
    assert_eq!(indices, vec![0, 2]);
    assert!(frontier.thresholds_inferred);
    assert!(!frontier.from_model);

    assert!(matches!(
        get_best_parameters(&experiment, None, false),
        Err(TdError::BestPoint(BestPointError::MultiObjectiveNotSupported))
    ));
}
