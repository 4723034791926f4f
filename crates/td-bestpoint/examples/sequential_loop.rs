use std::collections::BTreeMap;

use td_bestpoint::get_best_parameters;
use td_experiment::{Data, Evaluation, Experiment};
use td_generation::{
    GenerationStepConfig, GenerationStrategy, GenerationStrategyConfig, GeneratorSpec,
    NeighborhoodConfig, TrialBudget, UniformGeneratorConfig,
};
use td_types::{
    Metric, OptimizationConfig, Parameterization, RangeParameter, SearchSpace, SingleObjective,
};

/// Shifted sphere with its minimum at (0.3, 0.7).
fn evaluate(parameters: &Parameterization) -> f64 {
    let x1 = parameters["x1"].as_f64().unwrap_or_default();
    let x2 = parameters["x2"].as_f64().unwrap_or_default();
    (x1 - 0.3).powi(2) + (x2 - 0.7).powi(2)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let space = SearchSpace::new(
        vec![
            RangeParameter::float("x1", 0.0, 1.0)?.into(),
            RangeParameter::float("x2", 0.0, 1.0)?.into(),
        ],
        vec![],
    )?;
    let objective = SingleObjective::new(Metric::new("loss").with_lower_is_better(true), true)?;
    let mut experiment = Experiment::new("sphere", space)
        .with_optimization_config(OptimizationConfig::new(objective.into(), vec![])?)?;

    let mut strategy = GenerationStrategy::new(GenerationStrategyConfig::new(vec![
        GenerationStepConfig::new(
            GeneratorSpec::Uniform(UniformGeneratorConfig::default().with_seed(17)),
            TrialBudget::Exactly(6),
        )
        .with_max_parallelism(3),
        GenerationStepConfig::new(
            GeneratorSpec::Neighborhood(NeighborhoodConfig::default().with_seed(17)),
            TrialBudget::Unlimited,
        )
        .with_max_parallelism(2),
    ]))?;
    println!("Running strategy {}", strategy.name());

    while experiment.num_trials() < 20 {
        let next = strategy.get_next_trials(&mut experiment, 3, None)?;
        if next.optimization_complete {
            break;
        }
        if let Some(reason) = &next.blocked {
            println!("  blocked: {reason}");
        }
        for (index, parameters) in next.trials {
            let loss = evaluate(&parameters);
            let arm = experiment.trial(index)?.arms()[0].name.clone();
            let data = Data::from_evaluations(
                index,
                &BTreeMap::from([(arm, Evaluation::from([("loss".to_string(), (loss, None))]))]),
            );
            experiment.complete_trial(index, Some(data))?;
            println!(
                "  trial {index} [{}] loss {loss:.4}",
                strategy.current_node_name()
            );
        }
    }

    if let Some(best) = get_best_parameters(&experiment, Some(&strategy), true)? {
        println!(
            "Best arm {} (trial {}): loss {:.4}, model prediction: {}",
            best.point.arm_name, best.point.trial_index, best.objective_value, best.from_model
        );
        for (name, value) in &best.point.parameters {
            println!("  {name} = {value}");
        }
    }
    Ok(())
}
