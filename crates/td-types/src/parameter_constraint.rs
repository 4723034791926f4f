//! Linear inequality constraints over range parameters.
//!
//! Every constraint reduces to `Σ wᵢ·vᵢ ≤ b`. Order and sum constraints keep
//! their user-facing form alongside so that it can be displayed and
//! serialized as written.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::errors::ParameterError;
use crate::parameter::Parameter;
use crate::types::{ComparisonOp, Parameterization};

/// Slack allowed when comparing the weighted sum against the bound.
pub const CONSTRAINT_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterConstraint {
    Linear(LinearConstraint),
    Order(OrderConstraint),
    Sum(SumConstraint),
}

impl ParameterConstraint {
    /// Weights of the `≤` form.
    pub fn constraint_dict(&self) -> BTreeMap<String, f64> {
        match self {
            Self::Linear(c) => c.weights.clone(),
            Self::Order(c) => BTreeMap::from([(c.lower.clone(), 1.0), (c.upper.clone(), -1.0)]),
            Self::Sum(c) => c
                .parameters
                .iter()
                .map(|name| (name.clone(), c.inequality_weight()))
                .collect(),
        }
    }

    /// Right-hand side of the `≤` form.
    pub fn linear_bound(&self) -> f64 {
        match self {
            Self::Linear(c) => c.bound,
            Self::Order(_) => 0.0,
            Self::Sum(c) => c.stored_bound,
        }
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        match self {
            Self::Linear(c) => c.weights.keys().map(String::as_str).collect(),
            Self::Order(c) => vec![c.lower.as_str(), c.upper.as_str()],
            Self::Sum(c) => c.parameters.iter().map(String::as_str).collect(),
        }
    }

    /// Whether `values` satisfies the constraint.
    ///
    /// Errors when a referenced parameter is absent or not numeric.
    pub fn check(&self, values: &Parameterization) -> Result<bool, ParameterError> {
        let weights = self.constraint_dict();
        let mut weighted_sum = 0.0;
        for (name, weight) in &weights {
            let value = values
                .get(name)
                .ok_or_else(|| ParameterError::MissingConstraintParameter { name: name.clone() })?;
            let x = value.as_f64().ok_or_else(|| ParameterError::ValueTypeMismatch {
                name: name.clone(),
                value: value.to_string(),
                expected: "number".to_string(),
            })?;
            weighted_sum += x * weight;
        }
        Ok(weighted_sum <= self.linear_bound() + CONSTRAINT_TOLERANCE)
    }
}

impl fmt::Display for ParameterConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear(c) => write!(f, "{c}"),
            Self::Order(c) => write!(f, "{c}"),
            Self::Sum(c) => write!(f, "{c}"),
        }
    }
}

/// General `Σ wᵢ·vᵢ ≤ b`. Parameter names are checked when the constraint is
/// added to a search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraint {
    pub weights: BTreeMap<String, f64>,
    pub bound: f64,
}

impl LinearConstraint {
    pub fn new(weights: BTreeMap<String, f64>, bound: f64) -> Self {
        Self { weights, bound }
    }
}

impl fmt::Display for LinearConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self
            .weights
            .iter()
            .map(|(name, w)| format!("{w:?}*{name}"))
            .collect();
        write!(f, "ParameterConstraint({} <= {})", terms.join(" + "), self.bound)
    }
}

/// `lower ≤ upper`, i.e. weights `{lower: 1, upper: -1}` and bound 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConstraint {
    lower: String,
    upper: String,
}

impl OrderConstraint {
    pub fn new(lower: &Parameter, upper: &Parameter) -> Result<Self, ParameterError> {
        validate_constraint_parameters(&[lower, upper])?;
        Ok(Self {
            lower: lower.name().to_string(),
            upper: upper.name().to_string(),
        })
    }

    pub fn lower_parameter(&self) -> &str {
        &self.lower
    }

    pub fn upper_parameter(&self) -> &str {
        &self.upper
    }
}

impl fmt::Display for OrderConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderConstraint({} <= {})", self.lower, self.upper)
    }
}

/// `Σ pᵢ ≤ b` or `Σ pᵢ ≥ b`.
///
/// Stored in `≤` form: a lower bound keeps weights of -1 and a negated bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSumConstraint", into = "RawSumConstraint")]
pub struct SumConstraint {
    parameters: Vec<String>,
    is_upper_bound: bool,
    stored_bound: f64,
}

#[derive(Serialize, Deserialize)]
struct RawSumConstraint {
    parameters: Vec<String>,
    is_upper_bound: bool,
    bound: f64,
}

impl From<RawSumConstraint> for SumConstraint {
    fn from(raw: RawSumConstraint) -> Self {
        Self::from_names(raw.parameters, raw.is_upper_bound, raw.bound)
    }
}

impl From<SumConstraint> for RawSumConstraint {
    fn from(c: SumConstraint) -> Self {
        Self {
            bound: c.bound(),
            parameters: c.parameters,
            is_upper_bound: c.is_upper_bound,
        }
    }
}

impl SumConstraint {
    pub fn new(
        parameters: &[&Parameter],
        is_upper_bound: bool,
        bound: f64,
    ) -> Result<Self, ParameterError> {
        validate_constraint_parameters(parameters)?;
        let names = parameters.iter().map(|p| p.name().to_string()).collect();
        Ok(Self::from_names(names, is_upper_bound, bound))
    }

    fn from_names(parameters: Vec<String>, is_upper_bound: bool, bound: f64) -> Self {
        let weight = if is_upper_bound { 1.0 } else { -1.0 };
        Self {
            parameters,
            is_upper_bound,
            stored_bound: weight * bound,
        }
    }

    /// +1 for an upper bound, -1 for a lower bound.
    pub fn inequality_weight(&self) -> f64 {
        if self.is_upper_bound {
            1.0
        } else {
            -1.0
        }
    }

    /// Bound as the user wrote it.
    pub fn bound(&self) -> f64 {
        self.inequality_weight() * self.stored_bound
    }

    pub fn op(&self) -> ComparisonOp {
        if self.is_upper_bound {
            ComparisonOp::Leq
        } else {
            ComparisonOp::Geq
        }
    }

    pub fn is_upper_bound(&self) -> bool {
        self.is_upper_bound
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }
}

impl fmt::Display for SumConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SumConstraint({} {} {})",
            self.parameters.join(" + "),
            self.op(),
            self.bound()
        )
    }
}

/// Constraint parameters must be distinct, range-typed and linear-scaled.
pub fn validate_constraint_parameters(parameters: &[&Parameter]) -> Result<(), ParameterError> {
    let unique: BTreeSet<&str> = parameters.iter().map(|p| p.name()).collect();
    if unique.len() != parameters.len() {
        return Err(ParameterError::DuplicateConstraintParameter);
    }
    for parameter in parameters {
        let Some(range) = parameter.as_range() else {
            return Err(ParameterError::NonRangeConstraintParameter {
                name: parameter.name().to_string(),
            });
        };
        if range.log_scale() {
            return Err(ParameterError::LogScaleConstraintParameter {
                name: parameter.name().to_string(),
            });
        }
    }
    Ok(())
}

impl From<LinearConstraint> for ParameterConstraint {
    fn from(c: LinearConstraint) -> Self {
        Self::Linear(c)
    }
}

impl From<OrderConstraint> for ParameterConstraint {
    fn from(c: OrderConstraint) -> Self {
        Self::Order(c)
    }
}

impl From<SumConstraint> for ParameterConstraint {
    fn from(c: SumConstraint) -> Self {
        Self::Sum(c)
    }
}
