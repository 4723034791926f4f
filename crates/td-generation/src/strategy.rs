//! The generation strategy state machine.
//!
//! A strategy owns an ordered set of [`GenerationNode`]s and a pointer to the
//! current one. Every generation request first resolves the current node
//! against a [`TrialSnapshot`] (a pure step, see [`crate::transition`]) and
//! only then instantiates and runs the node's back-end.

use crate::encoding::SearchSpaceEncoding;
use crate::generator::GenRequest;
use crate::node::{compile_steps, default_true, GenerationNode, GenerationStepConfig, TrialBudget};
use crate::registry::GeneratorRegistry;
use crate::training::TrainingData;
use crate::transition::{evaluate_node, NodeEvaluation, TransitionDecision, TrialSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use td_experiment::{Experiment, GeneratorRun};
use td_types::{internal_error, Parameterization, StrategyError, TdResult};
use tracing::{debug, info, warn};

/// Linear strategy definition, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStrategyConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<GenerationStepConfig>,
    #[serde(default = "default_true")]
    pub enforce_sequential_optimization: bool,
}

impl GenerationStrategyConfig {
    pub fn new(steps: Vec<GenerationStepConfig>) -> Self {
        Self {
            name: None,
            steps,
            enforce_sequential_optimization: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_enforce_sequential_optimization(mut self, enforce: bool) -> Self {
        self.enforce_sequential_optimization = enforce;
        self
    }

    pub fn from_json(json: &str) -> TdResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Result of one generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Generated(GeneratorRun),
    /// Nothing generated for now; retry after trials resolve.
    Blocked(String),
    /// The last node is finished; no further trials will ever be generated.
    Complete,
}

/// Trials created by [`GenerationStrategy::get_next_trials`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NextTrials {
    pub trials: BTreeMap<usize, Parameterization>,
    pub blocked: Option<String>,
    pub optimization_complete: bool,
}

/// Serializable form of a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStrategySnapshot {
    pub name: String,
    pub nodes: Vec<GenerationNode>,
    pub current_index: usize,
    pub current_node_name: String,
    pub enforce_sequential_optimization: bool,
    pub generator_runs: Vec<GeneratorRun>,
    #[serde(default)]
    pub db_id: Option<i64>,
}

enum Resolution {
    At { index: usize, evaluation: NodeEvaluation },
    Complete { index: usize },
}

#[derive(Debug)]
pub struct GenerationStrategy {
    name: String,
    nodes: Vec<GenerationNode>,
    current: usize,
    enforce_sequential_optimization: bool,
    generator_runs: Vec<GeneratorRun>,
    registry: GeneratorRegistry,
    db_id: Option<i64>,
}

impl GenerationStrategy {
    /// Build a linear strategy from steps.
    pub fn new(config: GenerationStrategyConfig) -> Result<Self, StrategyError> {
        let nodes = compile_steps(&config.steps, config.enforce_sequential_optimization)
            .inspect_err(|e| warn!("Rejected generation strategy: {}", e))?;
        let name = config.name.unwrap_or_else(|| default_name(&nodes));
        Self::from_nodes(name, nodes, config.enforce_sequential_optimization)
    }

    /// Build a strategy from an explicit node graph; the first node is current.
    pub fn from_nodes(
        name: impl Into<String>,
        nodes: Vec<GenerationNode>,
        enforce_sequential_optimization: bool,
    ) -> Result<Self, StrategyError> {
        let name = name.into();
        validate_nodes(&nodes).inspect_err(|e| warn!("Rejected generation strategy {}: {}", name, e))?;
        info!("Created generation strategy {} with {} nodes", name, nodes.len());
        Ok(Self {
            name,
            nodes,
            current: 0,
            enforce_sequential_optimization,
            generator_runs: Vec::new(),
            registry: GeneratorRegistry::new(),
            db_id: None,
        })
    }

    pub fn with_registry(mut self, registry: GeneratorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry_mut(&mut self) -> &mut GeneratorRegistry {
        &mut self.registry
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[GenerationNode] {
        &self.nodes
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_node(&self) -> &GenerationNode {
        &self.nodes[self.current]
    }

    pub fn current_node_name(&self) -> &str {
        &self.nodes[self.current].name
    }

    pub fn enforce_sequential_optimization(&self) -> bool {
        self.enforce_sequential_optimization
    }

    pub fn generator_runs(&self) -> &[GeneratorRun] {
        &self.generator_runs
    }

    pub fn last_generator_run(&self) -> Option<&GeneratorRun> {
        self.generator_runs.last()
    }

    pub fn db_id(&self) -> Option<i64> {
        self.db_id
    }

    pub fn set_db_id(&mut self, db_id: Option<i64>) {
        self.db_id = db_id;
    }

    /// `(num_trials, max_parallelism)` per node, `-1` meaning unlimited.
    pub fn max_parallelism(&self) -> Vec<(i64, i64)> {
        self.nodes
            .iter()
            .map(|n| {
                let parallelism = n.max_parallelism().map_or(-1, |p| p as i64);
                (n.trial_budget().as_raw(), parallelism)
            })
            .collect()
    }

    /// Whether no further trials will be generated for this experiment.
    pub fn is_complete(&self, experiment: &Experiment) -> bool {
        matches!(self.resolve(&self.snapshot_of(experiment)), Resolution::Complete { .. })
    }

    /// Generate one arm.
    pub fn gen_single_trial(&mut self, experiment: &Experiment) -> TdResult<GenerationOutcome> {
        self.gen(experiment, 1)
    }

    /// Generate up to `n` arms from the current node.
    ///
    /// Fewer arms are produced when the node's remaining budget or
    /// parallelism allows fewer.
    pub fn gen(&mut self, experiment: &Experiment, n: usize) -> TdResult<GenerationOutcome> {
        let snapshot = self.snapshot_of(experiment);
        match self.resolve(&snapshot) {
            Resolution::Complete { index } => {
                self.move_to(index);
                info!("Generation strategy {} is complete", self.name);
                Ok(GenerationOutcome::Complete)
            }
            Resolution::At { index, evaluation } => {
                self.move_to(index);
                if let Some(reason) = evaluation.block_reason {
                    info!("Generation blocked: {}", reason);
                    return Ok(GenerationOutcome::Blocked(reason));
                }
                let n = evaluation.capacity.map_or(n, |c| n.min(c));
                let run = self.gen_from_current(experiment, n)?;
                Ok(GenerationOutcome::Generated(run))
            }
        }
    }

    /// Generate, attach and start up to `max_trials` single-arm trials.
    ///
    /// Stops early when generation is blocked or the strategy completes.
    pub fn get_next_trials(
        &mut self,
        experiment: &mut Experiment,
        max_trials: usize,
        ttl_seconds: Option<i64>,
    ) -> TdResult<NextTrials> {
        let expired = experiment.refresh_ttl();
        if !expired.is_empty() {
            debug!("Trials {:?} expired before generation", expired);
        }

        let mut next = NextTrials::default();
        for _ in 0..max_trials {
            match self.gen_single_trial(experiment)? {
                GenerationOutcome::Generated(run) => {
                    let index = experiment.new_trial(run, ttl_seconds)?;
                    experiment.mark_trial_running(index)?;
                    let arm = experiment.trial(index)?.arm()?.ok_or_else(|| {
                        internal_error!("trial {} was created without an arm", index)
                    })?;
                    next.trials.insert(index, arm.parameters.clone());
                }
                GenerationOutcome::Blocked(reason) => {
                    next.blocked = Some(reason);
                    break;
                }
                GenerationOutcome::Complete => {
                    next.optimization_complete = true;
                    break;
                }
            }
        }
        Ok(next)
    }

    /// Per-metric predictions of the current node's model, fitted on the
    /// experiment's data. `None` when the node's back-end has no model.
    pub fn predict(
        &self,
        experiment: &Experiment,
        parameterizations: &[Parameterization],
    ) -> TdResult<Option<Vec<BTreeMap<String, f64>>>> {
        let node = self.current_node();
        let mut backend = self
            .registry
            .instantiate(&node.generator, self.last_state_of(&node.name))?;
        let encoding = SearchSpaceEncoding::new(experiment.search_space());
        backend.fit(&TrainingData::from_experiment(experiment, &encoding))?;
        let points: Vec<Vec<f64>> = parameterizations.iter().map(|p| encoding.encode(p)).collect();
        Ok(backend.predict(&points))
    }

    pub fn snapshot(&self) -> GenerationStrategySnapshot {
        GenerationStrategySnapshot {
            name: self.name.clone(),
            nodes: self.nodes.clone(),
            current_index: self.current,
            current_node_name: self.current_node_name().to_string(),
            enforce_sequential_optimization: self.enforce_sequential_optimization,
            generator_runs: self.generator_runs.clone(),
            db_id: self.db_id,
        }
    }

    /// Rebuild a strategy; custom back-ends come from `registry`.
    pub fn from_snapshot(
        snapshot: GenerationStrategySnapshot,
        registry: GeneratorRegistry,
    ) -> Result<Self, StrategyError> {
        validate_nodes(&snapshot.nodes)?;
        match snapshot.nodes.get(snapshot.current_index) {
            Some(node) if node.name == snapshot.current_node_name => {}
            Some(node) => {
                return Err(StrategyError::SnapshotMismatch {
                    message: format!(
                        "node {} is {}, not {}",
                        snapshot.current_index, node.name, snapshot.current_node_name
                    ),
                })
            }
            None => {
                return Err(StrategyError::SnapshotMismatch {
                    message: format!(
                        "current index {} is out of range for {} nodes",
                        snapshot.current_index,
                        snapshot.nodes.len()
                    ),
                })
            }
        }
        Ok(Self {
            name: snapshot.name,
            nodes: snapshot.nodes,
            current: snapshot.current_index,
            enforce_sequential_optimization: snapshot.enforce_sequential_optimization,
            generator_runs: snapshot.generator_runs,
            registry,
            db_id: snapshot.db_id,
        })
    }

    fn snapshot_of(&self, experiment: &Experiment) -> TrialSnapshot {
        let last_node = self.last_generator_run().and_then(|r| r.node_name.as_deref());
        TrialSnapshot::from_experiment(experiment, last_node)
    }

    fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Follow transitions from the current node until one stays put.
    fn resolve(&self, snapshot: &TrialSnapshot) -> Resolution {
        let mut index = self.current;
        // A cycle of always-met criteria cannot visit more than every node once.
        for _ in 0..self.nodes.len() {
            let evaluation = evaluate_node(&self.nodes[index], snapshot, self.enforce_sequential_optimization);
            let next = match &evaluation.transition {
                TransitionDecision::Stay => None,
                TransitionDecision::Transition { to: None } => return Resolution::Complete { index },
                TransitionDecision::Transition { to: Some(target) } => self.node_index(target),
            };
            match next {
                Some(next) => index = next,
                None => return Resolution::At { index, evaluation },
            }
        }
        let evaluation = evaluate_node(&self.nodes[index], snapshot, self.enforce_sequential_optimization);
        Resolution::At { index, evaluation }
    }

    fn move_to(&mut self, index: usize) {
        if index != self.current {
            info!(
                "Transitioning from generation node {} to {}",
                self.nodes[self.current].name, self.nodes[index].name
            );
            self.current = index;
        }
    }

    fn last_state_of(&self, node_name: &str) -> Option<&serde_json::Value> {
        self.generator_runs
            .iter()
            .rev()
            .find(|r| r.node_name.as_deref() == Some(node_name))
            .and_then(|r| r.gen_state.as_ref())
    }

    fn gen_from_current(&mut self, experiment: &Experiment, n: usize) -> TdResult<GeneratorRun> {
        let node = self.nodes[self.current].clone();
        let mut backend = self
            .registry
            .instantiate(&node.generator, self.last_state_of(&node.name))?;

        let encoding = SearchSpaceEncoding::new(experiment.search_space());
        backend.fit(&TrainingData::from_experiment(experiment, &encoding))?;

        let generated_points: Vec<Vec<f64>> = experiment
            .trials()
            .iter()
            .flat_map(|t| t.arms())
            .map(|arm| encoding.encode(&arm.parameters))
            .collect();
        let bounds = encoding.bounds();
        let fixed_features = encoding.fixed_features();
        let round = |x: &[f64]| encoding.round(x);
        let mut request = GenRequest::new(n, &bounds, &node.gen_options)
            .with_fixed_features(&fixed_features)
            .with_rounding_func(&round)
            .with_generated_points(&generated_points);
        if !encoding.linear_constraints().is_empty() {
            request = request.with_linear_constraints(encoding.linear_constraints());
        }

        let generated = backend.gen(&request)?;
        if !generated.metadata.is_empty() {
            debug!("Generator {} metadata: {:?}", backend.name(), generated.metadata);
        }
        let parameterizations = generated
            .points
            .iter()
            .map(|p| encoding.decode(p))
            .collect::<TdResult<Vec<_>>>()?;
        debug!(
            "Generation node {} produced {} arms with {}",
            node.name,
            parameterizations.len(),
            backend.name()
        );

        let run = GeneratorRun::with_weights(parameterizations, generated.weights, backend.name())
            .with_node_name(node.name.clone())
            .with_gen_state(backend.state());
        self.generator_runs.push(run.clone());
        Ok(run)
    }
}

fn default_name(nodes: &[GenerationNode]) -> String {
    let mut keys: Vec<&str> = Vec::new();
    for node in nodes {
        let key = node.generator.key();
        if keys.last() != Some(&key) {
            keys.push(key);
        }
    }
    keys.join("+")
}

fn validate_nodes(nodes: &[GenerationNode]) -> Result<(), StrategyError> {
    if nodes.is_empty() {
        return Err(StrategyError::Empty);
    }
    let mut names = BTreeSet::new();
    for node in nodes {
        if !names.insert(node.name.as_str()) {
            return Err(StrategyError::DuplicateNodeName {
                name: node.name.clone(),
            });
        }
    }
    for node in nodes {
        for criterion in &node.transition_criteria {
            if let Some(target) = &criterion.transition_to {
                if !names.contains(target.as_str()) {
                    return Err(StrategyError::UnknownTransitionTarget {
                        node: node.name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        if let TrialBudget::Exactly(0) = node.trial_budget() {
            return Err(StrategyError::InvalidBudget { raw: 0 });
        }
    }
    Ok(())
}
