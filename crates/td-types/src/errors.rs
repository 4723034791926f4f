use thiserror::Error;

use crate::types::{ComparisonOp, TrialKind, TrialStatus};

/// Main error type for the Tandem system
#[derive(Error, Debug)]
pub enum TdError {
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Optimization config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Experiment error: {0}")]
    Experiment(#[from] ExperimentError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Generation strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Best point error: {0}")]
    BestPoint(#[from] BestPointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Parameter, parameter-constraint and search-space errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Parameter {name}: lower bound {lower} must be strictly less than upper bound {upper}")]
    InvalidBounds { name: String, lower: f64, upper: f64 },

    #[error("Parameter {name}: log-scale parameters require a positive lower bound, got {lower}")]
    InvalidLogBounds { name: String, lower: f64 },

    #[error("Parameter {name}: range parameters must be int or float, got {parameter_type}")]
    InvalidRangeType { name: String, parameter_type: String },

    #[error("Parameter {name}: choice parameters need at least two values")]
    TooFewChoices { name: String },

    #[error("Parameter {name}: duplicate choice value {value}")]
    DuplicateChoice { name: String, value: String },

    #[error("Parameter {name}: value {value} is not of type {expected}")]
    ValueTypeMismatch {
        name: String,
        value: String,
        expected: String,
    },

    #[error("Parameter {name}: value {value} is outside the parameter domain")]
    OutOfDomain { name: String, value: String },

    #[error("Duplicate parameter in constraint.")]
    DuplicateConstraintParameter,

    #[error("All parameters in a parameter constraint must be RangeParameters, {name} is not.")]
    NonRangeConstraintParameter { name: String },

    #[error("Parameter constraints not allowed on log scale parameters ({name}).")]
    LogScaleConstraintParameter { name: String },

    #[error("`{name}` not present in param_dict.")]
    MissingConstraintParameter { name: String },

    #[error("Parameter {name} is not defined in the search space")]
    UnknownParameter { name: String },

    #[error("Parameter {name} is defined more than once")]
    DuplicateParameter { name: String },

    #[error("Parameter {parameter} lists unknown dependent parameter {dependent}")]
    UnknownDependent { parameter: String, dependent: String },

    #[error("Parameter {name} is missing from the parameterization")]
    MissingValue { name: String },

    #[error("Parameterization violates constraint {constraint}")]
    ConstraintViolated { constraint: String },
}

/// Optimization configuration errors (user input errors)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("OptimizationConfig does not support MultiObjective. Use MultiObjectiveOptimizationConfig instead.")]
    MultiObjectiveInSingleConfig,

    #[error("MultiObjectiveOptimizationConfig requires an objective of type MultiObjective or ScalarizedObjective. Use OptimizationConfig instead if using a single-metric objective.")]
    SingleObjectiveInMultiConfig,

    #[error("Cannot constrain on objective metric {metric}.")]
    ObjectiveMetricConstrained { metric: String },

    #[error("Duplicate outcome constraints {metric}")]
    DuplicateOutcomeConstraints { metric: String },

    #[error("Lower bound {lower} is >= upper bound {upper} for {metric}")]
    InvertedConstraintBand { metric: String, lower: f64, upper: f64 },

    #[error("Objective threshold is on metric '{metric}', but that metric is not among the objectives.")]
    ThresholdNotOnObjective { metric: String },

    #[error("More than one objective threshold specified for metric {metric}.")]
    DuplicateObjectiveThreshold { metric: String },

    #[error("Objective threshold on {metric} bounds from {bounds_from} but {metric} is being {direction}.")]
    ThresholdDirectionMismatch {
        metric: String,
        bounds_from: &'static str,
        direction: &'static str,
    },

    #[error("Metric {metric}: minimize={minimize} contradicts lower_is_better={lower_is_better}")]
    PolarityMismatch {
        metric: String,
        minimize: bool,
        lower_is_better: bool,
    },

    #[error("Objective must reference at least one metric")]
    EmptyObjective,

    #[error("Metric {metric} appears more than once in the objective")]
    DuplicateObjectiveMetric { metric: String },

    #[error("Scalarization needs one weight per metric: {metrics} metrics, {weights} weights")]
    WeightLengthMismatch { metrics: usize, weights: usize },
}

/// Trial state errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrialError {
    #[error("Trial {index} not found")]
    NotFound { index: usize },

    #[error("Trial {index} cannot move from {from} to {to}")]
    UnsupportedTransition {
        index: usize,
        from: TrialStatus,
        to: TrialStatus,
    },

    #[error("Trial {index} has been marked {status}, so it no longer expects data.")]
    TerminalTrial { index: usize, status: TrialStatus },

    #[error("Trial {index} is {status}; arms can only be added to CANDIDATE trials")]
    NotCandidate { index: usize, status: TrialStatus },

    #[error("Trial {index} is a {actual} trial, operation requires a {expected} trial")]
    TrialTypeMismatch {
        index: usize,
        expected: TrialKind,
        actual: TrialKind,
    },

    #[error("Trial {index} can only hold a single arm, got {arms}")]
    TooManyArms { index: usize, arms: usize },

    #[error("Trial {index} has no arm named {arm}")]
    UnknownArm { index: usize, arm: String },
}

/// Experiment-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExperimentError {
    #[error("Status quo is outside the search space: {reason}")]
    StatusQuoOutsideSearchSpace { reason: String },

    #[error("Outcome constraint on {metric} is relative but the experiment has no status quo")]
    RelativeConstraintWithoutStatusQuo { metric: String },

    #[error("Experiment has no optimization config")]
    MissingOptimizationConfig,
}

/// Generator back-end errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("Search space exhausted: {message}")]
    SearchSpaceExhausted { message: String },

    #[error("This generator operates on [0, 1]^d; bounds {bounds:?} are not supported")]
    UnsupportedBounds { bounds: Vec<(f64, f64)> },

    #[error("Dimension mismatch: expected {expected} columns, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Generator {generator} needs observed data: {message}")]
    InsufficientData { generator: String, message: String },

    #[error("No generator registered under key {key}")]
    UnknownGenerator { key: String },
}

/// Generation strategy construction and reconstruction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("Generation strategy must contain at least one node")]
    Empty,

    #[error("Generation node name {name} is used more than once")]
    DuplicateNodeName { name: String },

    #[error("Node {node} transitions to unknown node {target}")]
    UnknownTransitionTarget { node: String, target: String },

    #[error("Only the last step in a generation strategy can have `num_trials` set to -1 (step {index})")]
    UnlimitedStepNotLast { index: usize },

    #[error("Invalid trial budget {raw}: expected -1 or a positive count")]
    InvalidBudget { raw: i64 },

    #[error("Snapshot is inconsistent: {message}")]
    SnapshotMismatch { message: String },
}

/// Best-point and Pareto selection errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BestPointError {
    #[error("Best point is not defined for multi-objective problems. Please use `get_pareto_optimal_parameters` instead.")]
    MultiObjectiveNotSupported,

    #[error("Pareto frontier requires a multi-objective optimization config")]
    NotMultiObjective,

    #[error("Relative bound on {metric} needs status quo data for that metric")]
    MissingStatusQuoData { metric: String },

    #[error("Observation for arm {arm} is missing metric {metric}")]
    MissingMetric { arm: String, metric: String },

    #[error("Threshold op {op} on {metric} does not match the objective direction")]
    MisalignedThreshold { metric: String, op: ComparisonOp },
}

/// Result type alias for Tandem operations
pub type TdResult<T> = Result<T, TdError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::TdError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::TdError::Internal(format!($($arg)*))
    };
}
