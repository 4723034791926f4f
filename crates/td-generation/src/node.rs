//! Generation nodes, steps and their transition criteria.

use crate::generator::GenOptions;
use crate::neighborhood::NeighborhoodConfig;
use crate::uniform::UniformGeneratorConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use td_types::StrategyError;

/// How many trials a step may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum TrialBudget {
    Exactly(usize),
    /// Keep generating until the strategy is stopped from outside.
    Unlimited,
}

impl TrialBudget {
    /// `-1` means unlimited; anything else must be a positive count.
    pub fn from_raw(raw: i64) -> Result<Self, StrategyError> {
        match raw {
            -1 => Ok(Self::Unlimited),
            n if n > 0 => Ok(Self::Exactly(n as usize)),
            _ => Err(StrategyError::InvalidBudget { raw }),
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            Self::Exactly(n) => n as i64,
            Self::Unlimited => -1,
        }
    }
}

impl TryFrom<i64> for TrialBudget {
    type Error = StrategyError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::from_raw(raw)
    }
}

impl From<TrialBudget> for i64 {
    fn from(budget: TrialBudget) -> Self {
        budget.as_raw()
    }
}

/// Which generator back-end a node runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneratorSpec {
    Uniform(UniformGeneratorConfig),
    Neighborhood(NeighborhoodConfig),
    /// A back-end registered under `key` in the strategy's registry.
    Custom {
        key: String,
        #[serde(default)]
        options: serde_json::Value,
    },
}

impl GeneratorSpec {
    pub fn key(&self) -> &str {
        match self {
            Self::Uniform(_) => crate::uniform::UNIFORM_GENERATOR_KEY,
            Self::Neighborhood(_) => crate::neighborhood::NEIGHBORHOOD_GENERATOR_KEY,
            Self::Custom { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKind {
    /// Trials from the node, excluding failed and abandoned ones, reach the threshold.
    MaxTrials,
    /// Completed or early-stopped trials from the node reach the threshold.
    MinTrials,
    /// Pending trials from the node reach the threshold.
    MaxGenerationParallelism,
    /// The node produced the most recent generator run.
    AutoTransitionAfterGen,
}

impl fmt::Display for CriterionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MaxTrials => "MaxTrials",
            Self::MinTrials => "MinTrials",
            Self::MaxGenerationParallelism => "MaxGenerationParallelism",
            Self::AutoTransitionAfterGen => "AutoTransitionAfterGen",
        };
        write!(f, "{name}")
    }
}

/// A condition on the trials of one node.
///
/// Criteria sharing a `transition_to` form a group; the node moves to that
/// target once every transition-blocking criterion of the group is met. A
/// `transition_to` of `None` means the end of the strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionCriterion {
    pub kind: CriterionKind,
    #[serde(default)]
    pub threshold: usize,
    #[serde(default)]
    pub transition_to: Option<String>,
    #[serde(default)]
    pub block_gen_if_met: bool,
    #[serde(default = "default_true")]
    pub block_transition_if_unmet: bool,
}

pub(crate) fn default_true() -> bool {
    true
}

impl TransitionCriterion {
    pub fn max_trials(threshold: usize) -> Self {
        Self {
            kind: CriterionKind::MaxTrials,
            threshold,
            transition_to: None,
            block_gen_if_met: true,
            block_transition_if_unmet: true,
        }
    }

    pub fn min_trials(threshold: usize) -> Self {
        Self {
            kind: CriterionKind::MinTrials,
            threshold,
            transition_to: None,
            block_gen_if_met: false,
            block_transition_if_unmet: true,
        }
    }

    pub fn max_generation_parallelism(threshold: usize) -> Self {
        Self {
            kind: CriterionKind::MaxGenerationParallelism,
            threshold,
            transition_to: None,
            block_gen_if_met: true,
            block_transition_if_unmet: false,
        }
    }

    pub fn auto_transition_after_gen() -> Self {
        Self {
            kind: CriterionKind::AutoTransitionAfterGen,
            threshold: 0,
            transition_to: None,
            block_gen_if_met: false,
            block_transition_if_unmet: true,
        }
    }

    pub fn to(mut self, node: impl Into<String>) -> Self {
        self.transition_to = Some(node.into());
        self
    }

    pub fn with_block_gen_if_met(mut self, block: bool) -> Self {
        self.block_gen_if_met = block;
        self
    }

    pub fn with_block_transition_if_unmet(mut self, block: bool) -> Self {
        self.block_transition_if_unmet = block;
        self
    }
}

/// One state of the generation strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationNode {
    pub name: String,
    pub generator: GeneratorSpec,
    #[serde(default)]
    pub transition_criteria: Vec<TransitionCriterion>,
    #[serde(default)]
    pub gen_options: GenOptions,
}

impl GenerationNode {
    pub fn new(name: impl Into<String>, generator: GeneratorSpec) -> Self {
        Self {
            name: name.into(),
            generator,
            transition_criteria: Vec::new(),
            gen_options: GenOptions::default(),
        }
    }

    pub fn with_criterion(mut self, criterion: TransitionCriterion) -> Self {
        self.transition_criteria.push(criterion);
        self
    }

    pub fn with_gen_options(mut self, gen_options: GenOptions) -> Self {
        self.gen_options = gen_options;
        self
    }

    fn threshold_of(&self, kind: CriterionKind) -> Option<usize> {
        self.transition_criteria
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.threshold)
    }

    pub fn trial_budget(&self) -> TrialBudget {
        self.threshold_of(CriterionKind::MaxTrials)
            .map_or(TrialBudget::Unlimited, TrialBudget::Exactly)
    }

    pub fn max_parallelism(&self) -> Option<usize> {
        self.threshold_of(CriterionKind::MaxGenerationParallelism)
    }
}

/// Linear-strategy step, compiled into a [`GenerationNode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStepConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub generator: GeneratorSpec,
    pub num_trials: TrialBudget,
    /// Completed trials required before moving on. Defaults to 1 under
    /// sequential enforcement and 0 otherwise.
    #[serde(default)]
    pub min_trials_observed: Option<usize>,
    #[serde(default)]
    pub max_parallelism: Option<usize>,
    #[serde(default = "default_true")]
    pub enforce_num_trials: bool,
    #[serde(default)]
    pub gen_options: GenOptions,
}

impl GenerationStepConfig {
    pub fn new(generator: GeneratorSpec, num_trials: TrialBudget) -> Self {
        Self {
            name: None,
            generator,
            num_trials,
            min_trials_observed: None,
            max_parallelism: None,
            enforce_num_trials: true,
            gen_options: GenOptions::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_min_trials_observed(mut self, min_trials_observed: usize) -> Self {
        self.min_trials_observed = Some(min_trials_observed);
        self
    }

    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = Some(max_parallelism);
        self
    }

    pub fn with_enforce_num_trials(mut self, enforce: bool) -> Self {
        self.enforce_num_trials = enforce;
        self
    }

    pub fn with_gen_options(mut self, gen_options: GenOptions) -> Self {
        self.gen_options = gen_options;
        self
    }
}

pub(crate) fn step_name(index: usize, step: &GenerationStepConfig) -> String {
    step.name
        .clone()
        .unwrap_or_else(|| format!("GenerationStep_{index}"))
}

/// Compile linear steps into nodes chained by their criteria.
pub fn compile_steps(
    steps: &[GenerationStepConfig],
    enforce_sequential_optimization: bool,
) -> Result<Vec<GenerationNode>, StrategyError> {
    if steps.is_empty() {
        return Err(StrategyError::Empty);
    }
    for (index, step) in steps.iter().enumerate() {
        match step.num_trials {
            TrialBudget::Unlimited if index + 1 < steps.len() => {
                return Err(StrategyError::UnlimitedStepNotLast { index })
            }
            TrialBudget::Exactly(0) => return Err(StrategyError::InvalidBudget { raw: 0 }),
            _ => {}
        }
    }

    let names: Vec<String> = steps.iter().enumerate().map(|(i, s)| step_name(i, s)).collect();
    let nodes = steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let next = names.get(index + 1).cloned();
            let mut node = GenerationNode::new(names[index].clone(), step.generator.clone())
                .with_gen_options(step.gen_options.clone());

            if let TrialBudget::Exactly(n) = step.num_trials {
                let mut max_trials =
                    TransitionCriterion::max_trials(n).with_block_gen_if_met(step.enforce_num_trials);
                max_trials.transition_to = next.clone();
                node = node.with_criterion(max_trials);

                if let Some(next) = &next {
                    let default_min = usize::from(enforce_sequential_optimization);
                    let min = step.min_trials_observed.unwrap_or(default_min).min(n);
                    if min > 0 {
                        node = node.with_criterion(TransitionCriterion::min_trials(min).to(next.clone()));
                    }
                }
            }
            if let Some(limit) = step.max_parallelism {
                node = node.with_criterion(TransitionCriterion::max_generation_parallelism(limit));
            }
            node
        })
        .collect();
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform() -> GeneratorSpec {
        GeneratorSpec::Uniform(UniformGeneratorConfig::default().with_seed(0))
    }

    #[test]
    fn budget_sentinel() {
        assert_eq!(TrialBudget::from_raw(-1).unwrap(), TrialBudget::Unlimited);
        assert_eq!(TrialBudget::from_raw(5).unwrap(), TrialBudget::Exactly(5));
        assert_eq!(
            TrialBudget::from_raw(0).unwrap_err(),
            StrategyError::InvalidBudget { raw: 0 }
        );
        assert_eq!(serde_json::to_string(&TrialBudget::Unlimited).unwrap(), "-1");
        assert!(serde_json::from_str::<TrialBudget>("-3").is_err());
    }

    #[test]
    fn steps_compile_into_chained_nodes() {
        let steps = vec![
            GenerationStepConfig::new(uniform(), TrialBudget::Exactly(5)).with_max_parallelism(5),
            GenerationStepConfig::new(
                GeneratorSpec::Neighborhood(NeighborhoodConfig::default()),
                TrialBudget::Unlimited,
            )
            .with_max_parallelism(3),
        ];
        let nodes = compile_steps(&steps, true).unwrap();
        assert_eq!(nodes[0].name, "GenerationStep_0");
        assert_eq!(nodes[0].trial_budget(), TrialBudget::Exactly(5));
        assert_eq!(nodes[0].max_parallelism(), Some(5));

        let kinds: Vec<CriterionKind> = nodes[0].transition_criteria.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CriterionKind::MaxTrials,
                CriterionKind::MinTrials,
                CriterionKind::MaxGenerationParallelism
            ]
        );
        assert_eq!(
            nodes[0].transition_criteria[1].transition_to.as_deref(),
            Some("GenerationStep_1")
        );
        assert_eq!(nodes[1].trial_budget(), TrialBudget::Unlimited);

        let relaxed = compile_steps(&steps, false).unwrap();
        assert_eq!(relaxed[0].transition_criteria.len(), 2);
    }

    #[test]
    fn only_the_last_step_may_be_unlimited() {
        let steps = vec![
            GenerationStepConfig::new(uniform(), TrialBudget::Unlimited),
            GenerationStepConfig::new(uniform(), TrialBudget::Exactly(3)),
        ];
        assert_eq!(
            compile_steps(&steps, true).unwrap_err(),
            StrategyError::UnlimitedStepNotLast { index: 0 }
        );
        assert_eq!(compile_steps(&[], true).unwrap_err(), StrategyError::Empty);
    }

    #[test]
    fn step_config_loads_from_json() {
        let step: GenerationStepConfig = serde_json::from_str(
            r#"{"generator": {"type": "uniform", "seed": 3}, "num_trials": -1}"#,
        )
        .unwrap();
        assert_eq!(step.num_trials, TrialBudget::Unlimited);
        assert!(step.enforce_num_trials);
        assert_eq!(step.generator.key(), "uniform");
    }
}
