//! Parameter domains: range, choice and fixed parameters.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::ParameterError;
use crate::types::{ParameterType, ParameterValue};

/// A single dimension of a search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Parameter {
    Range(RangeParameter),
    Choice(ChoiceParameter),
    Fixed(FixedParameter),
}

impl Parameter {
    pub fn name(&self) -> &str {
        match self {
            Self::Range(p) => &p.name,
            Self::Choice(p) => &p.name,
            Self::Fixed(p) => &p.name,
        }
    }

    pub fn parameter_type(&self) -> ParameterType {
        match self {
            Self::Range(p) => p.parameter_type,
            Self::Choice(p) => p.parameter_type,
            Self::Fixed(p) => p.parameter_type,
        }
    }

    pub fn as_range(&self) -> Option<&RangeParameter> {
        match self {
            Self::Range(p) => Some(p),
            _ => None,
        }
    }

    /// Whether `value` lies in the parameter's domain.
    pub fn validate(&self, value: &ParameterValue) -> bool {
        match self {
            Self::Range(p) => p.contains(value),
            Self::Choice(p) => p.position(value).is_some(),
            Self::Fixed(p) => p.value.loosely_equals(value),
        }
    }

    /// Coerce a raw value into the parameter's canonical representation.
    pub fn cast(&self, value: &ParameterValue) -> Result<ParameterValue, ParameterError> {
        match self {
            Self::Range(p) => p.cast(value),
            Self::Choice(p) => p
                .position(value)
                .map(|idx| p.values[idx].clone())
                .ok_or_else(|| ParameterError::OutOfDomain {
                    name: p.name.clone(),
                    value: value.to_string(),
                }),
            Self::Fixed(p) => {
                if p.value.loosely_equals(value) {
                    Ok(p.value.clone())
                } else {
                    Err(ParameterError::OutOfDomain {
                        name: p.name.clone(),
                        value: value.to_string(),
                    })
                }
            }
        }
    }

    /// Names of sub-parameters activated when this parameter takes `value`.
    pub fn dependents_for(&self, value: &ParameterValue) -> &[String] {
        match self {
            Self::Range(_) => &[],
            Self::Choice(p) => p
                .dependents
                .iter()
                .find(|(v, _)| v.loosely_equals(value))
                .map(|(_, names)| names.as_slice())
                .unwrap_or(&[]),
            Self::Fixed(p) => &p.dependents,
        }
    }

    /// All sub-parameter names this parameter can activate.
    pub fn all_dependents(&self) -> Vec<&str> {
        match self {
            Self::Range(_) => Vec::new(),
            Self::Choice(p) => p
                .dependents
                .iter()
                .flat_map(|(_, names)| names.iter().map(String::as_str))
                .collect(),
            Self::Fixed(p) => p.dependents.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_hierarchical(&self) -> bool {
        !self.all_dependents().is_empty()
    }
}

/// Continuous or integer interval `[lower, upper]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRangeParameter")]
pub struct RangeParameter {
    name: String,
    parameter_type: ParameterType,
    lower: f64,
    upper: f64,
    log_scale: bool,
    digits: Option<u32>,
}

#[derive(Deserialize)]
struct RawRangeParameter {
    name: String,
    parameter_type: ParameterType,
    lower: f64,
    upper: f64,
    #[serde(default)]
    log_scale: bool,
    #[serde(default)]
    digits: Option<u32>,
}

impl TryFrom<RawRangeParameter> for RangeParameter {
    type Error = ParameterError;

    fn try_from(raw: RawRangeParameter) -> Result<Self, Self::Error> {
        let param = Self {
            name: raw.name,
            parameter_type: raw.parameter_type,
            lower: raw.lower,
            upper: raw.upper,
            log_scale: raw.log_scale,
            digits: raw.digits,
        };
        param.validate_domain()?;
        Ok(param)
    }
}

impl RangeParameter {
    pub fn new(
        name: impl Into<String>,
        parameter_type: ParameterType,
        lower: f64,
        upper: f64,
    ) -> Result<Self, ParameterError> {
        let param = Self {
            name: name.into(),
            parameter_type,
            lower,
            upper,
            log_scale: false,
            digits: None,
        };
        param.validate_domain()?;
        Ok(param)
    }

    pub fn float(name: impl Into<String>, lower: f64, upper: f64) -> Result<Self, ParameterError> {
        Self::new(name, ParameterType::Float, lower, upper)
    }

    pub fn int(name: impl Into<String>, lower: i64, upper: i64) -> Result<Self, ParameterError> {
        Self::new(name, ParameterType::Int, lower as f64, upper as f64)
    }

    pub fn with_log_scale(mut self, log_scale: bool) -> Result<Self, ParameterError> {
        self.log_scale = log_scale;
        self.validate_domain()?;
        Ok(self)
    }

    pub fn with_digits(mut self, digits: u32) -> Self {
        self.digits = Some(digits);
        self
    }

    fn validate_domain(&self) -> Result<(), ParameterError> {
        if !self.parameter_type.is_numeric() {
            return Err(ParameterError::InvalidRangeType {
                name: self.name.clone(),
                parameter_type: self.parameter_type.to_string(),
            });
        }
        if !(self.lower < self.upper) {
            return Err(ParameterError::InvalidBounds {
                name: self.name.clone(),
                lower: self.lower,
                upper: self.upper,
            });
        }
        if self.log_scale && self.lower <= 0.0 {
            return Err(ParameterError::InvalidLogBounds {
                name: self.name.clone(),
                lower: self.lower,
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_type(&self) -> ParameterType {
        self.parameter_type
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn log_scale(&self) -> bool {
        self.log_scale
    }

    pub fn digits(&self) -> Option<u32> {
        self.digits
    }

    pub fn is_int(&self) -> bool {
        self.parameter_type == ParameterType::Int
    }

    pub fn contains(&self, value: &ParameterValue) -> bool {
        let x = match value {
            ParameterValue::Int(v) => *v as f64,
            ParameterValue::Float(v) => *v,
            _ => return false,
        };
        if self.is_int() && x.fract() != 0.0 {
            return false;
        }
        x >= self.lower && x <= self.upper
    }

    /// Round to `digits` decimal places, half to even. NaN and infinities
    /// pass through unchanged.
    pub fn round(&self, x: f64) -> f64 {
        let Some(digits) = self.digits else {
            return x;
        };
        Decimal::from_f64(x)
            .map(|d| d.round_dp_with_strategy(digits, RoundingStrategy::MidpointNearestEven))
            .and_then(|d| d.to_f64())
            .unwrap_or(x)
    }

    pub fn cast(&self, value: &ParameterValue) -> Result<ParameterValue, ParameterError> {
        let x = match value {
            ParameterValue::Int(v) => *v as f64,
            ParameterValue::Float(v) => *v,
            other => {
                return Err(ParameterError::ValueTypeMismatch {
                    name: self.name.clone(),
                    value: other.to_string(),
                    expected: self.parameter_type.to_string(),
                })
            }
        };
        Ok(self.value_from_f64(x))
    }

    /// Build a value of this parameter's type from a raw number, rounding as
    /// the type requires. No clamping is applied.
    pub fn value_from_f64(&self, x: f64) -> ParameterValue {
        if self.is_int() {
            ParameterValue::Int(x.round() as i64)
        } else {
            ParameterValue::Float(self.round(x))
        }
    }
}

/// Finite set of admissible values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawChoiceParameter")]
pub struct ChoiceParameter {
    name: String,
    parameter_type: ParameterType,
    values: Vec<ParameterValue>,
    is_ordered: bool,
    is_task: bool,
    dependents: Vec<(ParameterValue, Vec<String>)>,
}

#[derive(Deserialize)]
struct RawChoiceParameter {
    name: String,
    parameter_type: ParameterType,
    values: Vec<ParameterValue>,
    #[serde(default)]
    is_ordered: bool,
    #[serde(default)]
    is_task: bool,
    #[serde(default)]
    dependents: Vec<(ParameterValue, Vec<String>)>,
}

impl TryFrom<RawChoiceParameter> for ChoiceParameter {
    type Error = ParameterError;

    fn try_from(raw: RawChoiceParameter) -> Result<Self, Self::Error> {
        let mut param = Self::new(raw.name, raw.parameter_type, raw.values)?
            .with_ordered(raw.is_ordered)
            .with_task(raw.is_task);
        if !raw.dependents.is_empty() {
            param = param.with_dependents(raw.dependents)?;
        }
        Ok(param)
    }
}

impl ChoiceParameter {
    pub fn new(
        name: impl Into<String>,
        parameter_type: ParameterType,
        values: Vec<ParameterValue>,
    ) -> Result<Self, ParameterError> {
        let name = name.into();
        if values.len() < 2 {
            return Err(ParameterError::TooFewChoices { name });
        }

        let mut coerced: Vec<ParameterValue> = Vec::with_capacity(values.len());
        for value in values {
            let value = coerce_to_type(&name, parameter_type, value)?;
            if coerced.iter().any(|v| v.loosely_equals(&value)) {
                return Err(ParameterError::DuplicateChoice {
                    name,
                    value: value.to_string(),
                });
            }
            coerced.push(value);
        }

        Ok(Self {
            name,
            parameter_type,
            values: coerced,
            is_ordered: false,
            is_task: false,
            dependents: Vec::new(),
        })
    }

    pub fn with_ordered(mut self, is_ordered: bool) -> Self {
        self.is_ordered = is_ordered;
        self
    }

    pub fn with_task(mut self, is_task: bool) -> Self {
        self.is_task = is_task;
        self
    }

    /// Attach hierarchical dependents. Every key must be one of the values.
    pub fn with_dependents(
        mut self,
        dependents: Vec<(ParameterValue, Vec<String>)>,
    ) -> Result<Self, ParameterError> {
        for (value, _) in &dependents {
            if self.position(value).is_none() {
                return Err(ParameterError::OutOfDomain {
                    name: self.name.clone(),
                    value: value.to_string(),
                });
            }
        }
        self.dependents = dependents;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_type(&self) -> ParameterType {
        self.parameter_type
    }

    pub fn values(&self) -> &[ParameterValue] {
        &self.values
    }

    pub fn is_ordered(&self) -> bool {
        self.is_ordered
    }

    pub fn is_task(&self) -> bool {
        self.is_task
    }

    pub fn dependents(&self) -> &[(ParameterValue, Vec<String>)] {
        &self.dependents
    }

    /// Index of `value` among the choices.
    pub fn position(&self, value: &ParameterValue) -> Option<usize> {
        self.values.iter().position(|v| v.loosely_equals(value))
    }
}

/// A parameter pinned to one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedParameter {
    name: String,
    parameter_type: ParameterType,
    value: ParameterValue,
    #[serde(default)]
    dependents: Vec<String>,
}

impl FixedParameter {
    pub fn new(name: impl Into<String>, value: ParameterValue) -> Self {
        Self {
            name: name.into(),
            parameter_type: value.parameter_type(),
            value,
            dependents: Vec::new(),
        }
    }

    pub fn with_dependents(mut self, dependents: Vec<String>) -> Self {
        self.dependents = dependents;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }
}

fn coerce_to_type(
    name: &str,
    parameter_type: ParameterType,
    value: ParameterValue,
) -> Result<ParameterValue, ParameterError> {
    match (parameter_type, value) {
        (ParameterType::Float, ParameterValue::Int(v)) => Ok(ParameterValue::Float(v as f64)),
        (ParameterType::Float, v @ ParameterValue::Float(_))
        | (ParameterType::Int, v @ ParameterValue::Int(_))
        | (ParameterType::Bool, v @ ParameterValue::Bool(_))
        | (ParameterType::String, v @ ParameterValue::Str(_)) => Ok(v),
        (expected, other) => Err(ParameterError::ValueTypeMismatch {
            name: name.to_string(),
            value: other.to_string(),
            expected: expected.to_string(),
        }),
    }
}

impl From<RangeParameter> for Parameter {
    fn from(p: RangeParameter) -> Self {
        Self::Range(p)
    }
}

impl From<ChoiceParameter> for Parameter {
    fn from(p: ChoiceParameter) -> Self {
        Self::Choice(p)
    }
}

impl From<FixedParameter> for Parameter {
    fn from(p: FixedParameter) -> Self {
        Self::Fixed(p)
    }
}
