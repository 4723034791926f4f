use std::collections::BTreeMap;

use td_experiment::{Data, Evaluation, Experiment};
use td_generation::{
    GenRequest, GeneratedPoints, GenerationNode, GenerationOutcome, GenerationStepConfig,
    GenerationStrategy, GenerationStrategyConfig, GenerationStrategySnapshot, GeneratorBackend,
    GeneratorRegistry, GeneratorSpec, NeighborhoodConfig, TrialBudget, UniformGeneratorConfig,
};
use td_types::{
    ChoiceParameter, GeneratorError, Metric, OptimizationConfig, OrderConstraint, Parameter,
    ParameterType, ParameterValue, RangeParameter, SearchSpace, SingleObjective, TdError,
};

fn space() -> SearchSpace {
    SearchSpace::new(
        vec![
            RangeParameter::float("x1", 0.0, 1.0).unwrap().into(),
            RangeParameter::float("x2", 0.0, 10.0).unwrap().into(),
        ],
        vec![],
    )
    .unwrap()
}

fn experiment() -> Experiment {
    let objective = SingleObjective::new(Metric::new("loss"), true).unwrap();
    Experiment::new("flow", space())
        .with_optimization_config(OptimizationConfig::new(objective.into(), vec![]).unwrap())
        .unwrap()
}

fn sobol_then_model(enforce_sequential: bool) -> GenerationStrategy {
    GenerationStrategy::new(
        GenerationStrategyConfig::new(vec![
            GenerationStepConfig::new(
                GeneratorSpec::Uniform(UniformGeneratorConfig::default().with_seed(0)),
                TrialBudget::Exactly(5),
            )
            .with_max_parallelism(5),
            GenerationStepConfig::new(
                GeneratorSpec::Neighborhood(NeighborhoodConfig::default().with_seed(0)),
                TrialBudget::Unlimited,
            )
            .with_max_parallelism(3),
        ])
        .with_enforce_sequential_optimization(enforce_sequential),
    )
    .unwrap()
}

fn unlimited_uniform(seed: u64) -> GenerationStrategy {
    GenerationStrategy::new(GenerationStrategyConfig::new(vec![GenerationStepConfig::new(
        GeneratorSpec::Uniform(UniformGeneratorConfig::default().with_seed(seed)),
        TrialBudget::Unlimited,
    )]))
    .unwrap()
}

fn loss(arm: &str, value: f64) -> Data {
    Data::from_evaluations(
        0,
        &BTreeMap::from([(
            arm.to_string(),
            Evaluation::from([("loss".to_string(), (value, None))]),
        )]),
    )
}

#[test]
fn blocks_until_a_trial_completes_then_moves_on() {
    let mut experiment = experiment();
    let mut strategy = sobol_then_model(true);

    let first = strategy.get_next_trials(&mut experiment, 10, None).unwrap();
    assert_eq!(first.trials.len(), 5);
    assert!(first.blocked.is_some());
    assert!(!first.optimization_complete);
    assert_eq!(strategy.current_node_name(), "GenerationStep_0");

    assert!(matches!(
        strategy.gen_single_trial(&experiment).unwrap(),
        GenerationOutcome::Blocked(_)
    ));

    let arm = experiment.trial(0).unwrap().arms()[0].name.clone();
    experiment.complete_trial(0, Some(loss(&arm, 0.3))).unwrap();

    let next = strategy.get_next_trials(&mut experiment, 1, None).unwrap();
    assert_eq!(next.trials.len(), 1);
    assert_eq!(strategy.current_node_name(), "GenerationStep_1");
    let index = *next.trials.keys().next().unwrap();
    assert_eq!(
        experiment.trial(index).unwrap().generation_node(),
        Some("GenerationStep_1")
    );
    assert_eq!(
        strategy.last_generator_run().unwrap().generator_key,
        "neighborhood"
    );
}

#[test]
fn model_node_caps_parallelism() {
    let mut experiment = experiment();
    let mut strategy = sobol_then_model(true);
    strategy.get_next_trials(&mut experiment, 5, None).unwrap();
    for index in 0..5 {
        let arm = experiment.trial(index).unwrap().arms()[0].name.clone();
        experiment
            .complete_trial(index, Some(loss(&arm, index as f64)))
            .unwrap();
    }

    let next = strategy.get_next_trials(&mut experiment, 10, None).unwrap();
    assert_eq!(next.trials.len(), 3);
    assert!(next.blocked.unwrap().contains("GenerationStep_1"));
}

#[test]
fn without_sequential_enforcement_nothing_blocks() {
    let mut experiment = experiment();
    let mut strategy = sobol_then_model(false);

    let next = strategy.get_next_trials(&mut experiment, 8, None).unwrap();
    assert_eq!(next.trials.len(), 8);
    assert!(next.blocked.is_none());
    assert_eq!(strategy.current_node_name(), "GenerationStep_1");
    assert_eq!(experiment.trial(5).unwrap().generation_node(), Some("GenerationStep_1"));
}

#[test]
fn last_bounded_step_completes_the_strategy() {
    let mut experiment = experiment();
    let mut strategy = GenerationStrategy::new(GenerationStrategyConfig::new(vec![
        GenerationStepConfig::new(
            GeneratorSpec::Uniform(UniformGeneratorConfig::default().with_seed(2)),
            TrialBudget::Exactly(2),
        ),
    ]))
    .unwrap();

    assert!(!strategy.is_complete(&experiment));
    let next = strategy.get_next_trials(&mut experiment, 5, None).unwrap();
    assert_eq!(next.trials.len(), 2);
    assert!(next.optimization_complete);
    assert!(next.blocked.is_none());
    assert!(strategy.is_complete(&experiment));
    assert_eq!(
        strategy.gen_single_trial(&experiment).unwrap(),
        GenerationOutcome::Complete
    );
}

#[test]
fn resumes_identically_from_a_snapshot_at_every_split() {
    let k = 5;
    let mut reference_experiment = experiment();
    let mut reference = unlimited_uniform(7);
    let expected = reference
        .get_next_trials(&mut reference_experiment, k, None)
        .unwrap();
    let expected: Vec<_> = expected.trials.into_values().collect();

    for j in 0..=k {
        let mut experiment = experiment();
        let mut strategy = unlimited_uniform(7);
        let mut produced: Vec<_> = strategy
            .get_next_trials(&mut experiment, j, None)
            .unwrap()
            .trials
            .into_values()
            .collect();

        let json = serde_json::to_string(&strategy.snapshot()).unwrap();
        let snapshot: GenerationStrategySnapshot = serde_json::from_str(&json).unwrap();
        let mut restored =
            GenerationStrategy::from_snapshot(snapshot, GeneratorRegistry::new()).unwrap();
        produced.extend(
            restored
                .get_next_trials(&mut experiment, k - j, None)
                .unwrap()
                .trials
                .into_values(),
        );
        assert_eq!(produced, expected, "split at {j}");
    }
}

#[test]
fn snapshot_survives_serialization() {
    let mut experiment = experiment();
    let mut strategy = sobol_then_model(true);
    strategy.get_next_trials(&mut experiment, 2, None).unwrap();
    strategy.set_db_id(Some(42));

    let snapshot = strategy.snapshot();
    let json = serde_json::to_string(&snapshot).unwrap();
    let parsed: GenerationStrategySnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.nodes, snapshot.nodes);
    assert_eq!(parsed.current_node_name, "GenerationStep_0");
    let ids: Vec<_> = parsed.generator_runs.iter().map(|r| r.id).collect();
    let expected: Vec<_> = snapshot.generator_runs.iter().map(|r| r.id).collect();
    assert_eq!(ids, expected);
    assert_eq!(parsed.generator_runs[1].gen_state, snapshot.generator_runs[1].gen_state);
    assert_eq!(parsed.db_id, Some(42));
}

#[test]
fn order_constraint_holds_for_every_generated_arm() {
    let x1: Parameter = RangeParameter::float("x1", 0.0, 1.0).unwrap().into();
    let x2: Parameter = RangeParameter::float("x2", 0.0, 1.0).unwrap().into();
    let order = OrderConstraint::new(&x1, &x2).unwrap();
    let space = SearchSpace::new(vec![x1, x2], vec![order.into()]).unwrap();
    let experiment = Experiment::new("ordered", space);

    let mut strategy = unlimited_uniform(0);
    let GenerationOutcome::Generated(run) = strategy.gen(&experiment, 10).unwrap() else {
        panic!("expected a generator run");
    };
    assert_eq!(run.len(), 10);
    for p in &run.parameterizations {
        let lo = p["x1"].as_f64().unwrap();
        let hi = p["x2"].as_f64().unwrap();
        assert!(lo <= hi, "{lo} > {hi}");
    }
}

#[test]
fn exhausted_space_is_an_error() {
    let choice = ChoiceParameter::new(
        "color",
        ParameterType::String,
        vec![ParameterValue::from("red"), ParameterValue::from("blue")],
    )
    .unwrap();
    let space = SearchSpace::new(vec![choice.into()], vec![]).unwrap();
    let mut experiment = Experiment::new("colors", space);
    let mut strategy = unlimited_uniform(3);

    let next = strategy.get_next_trials(&mut experiment, 2, None).unwrap();
    assert_eq!(next.trials.len(), 2);
    let err = strategy.gen_single_trial(&experiment).unwrap_err();
    assert!(matches!(
        err,
        TdError::Generator(GeneratorError::SearchSpaceExhausted { .. })
    ));
}

#[test]
fn model_predictions_come_from_the_current_node() {
    let mut experiment = experiment();
    let mut strategy = sobol_then_model(true);
    strategy.get_next_trials(&mut experiment, 5, None).unwrap();

    let params: Vec<_> = experiment
        .trials()
        .iter()
        .map(|t| t.arms()[0].parameters.clone())
        .collect();
    assert_eq!(strategy.predict(&experiment, &params).unwrap(), None);

    for index in 0..5 {
        let arm = experiment.trial(index).unwrap().arms()[0].name.clone();
        experiment
            .complete_trial(index, Some(loss(&arm, index as f64)))
            .unwrap();
    }
    strategy.get_next_trials(&mut experiment, 1, None).unwrap();
    let predicted = strategy.predict(&experiment, &params).unwrap().unwrap();
    assert_eq!(predicted.len(), 5);
    assert_eq!(predicted[3]["loss"], 3.0);
}

struct CenterGenerator;

impl GeneratorBackend for CenterGenerator {
    fn name(&self) -> &str {
        "center"
    }

    fn gen(&mut self, request: &GenRequest<'_>) -> Result<GeneratedPoints, GeneratorError> {
        Ok(GeneratedPoints::unit_weights(vec![
            request.finish_point(vec![0.5; request.dim()]);
            request.n
        ]))
    }
}

#[test]
fn custom_backends_come_from_the_registry() {
    let node = GenerationNode::new(
        "center",
        GeneratorSpec::Custom {
            key: "center".to_string(),
            options: serde_json::Value::Null,
        },
    );
    let experiment = experiment();

    let mut bare = GenerationStrategy::from_nodes("custom", vec![node.clone()], true).unwrap();
    assert!(matches!(
        bare.gen_single_trial(&experiment),
        Err(TdError::Generator(GeneratorError::UnknownGenerator { .. }))
    ));

    let registry = GeneratorRegistry::new().with_generator("center", |_, _| {
        Ok(Box::new(CenterGenerator) as Box<dyn GeneratorBackend>)
    });
    let mut strategy = GenerationStrategy::from_nodes("custom", vec![node], true)
        .unwrap()
        .with_registry(registry);
    let GenerationOutcome::Generated(run) = strategy.gen_single_trial(&experiment).unwrap() else {
        panic!("expected a generator run");
    };
    assert_eq!(run.generator_key, "center");
    assert_eq!(run.node_name.as_deref(), Some("center"));
    assert_eq!(run.parameterizations[0]["x1"], ParameterValue::Float(0.5));
    assert_eq!(run.parameterizations[0]["x2"], ParameterValue::Float(5.0));
    assert_eq!(strategy.last_generator_run(), Some(&run));
}
