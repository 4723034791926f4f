//! Unit-cube encoding of a search space.
//!
//! Generator back-ends only ever see points in `[0, 1]^d`. Each parameter owns
//! one column: range parameters are scaled (linearly or in log space), choice
//! parameters are split into equal-width bins, and fixed parameters become
//! fixed features pinned at the centre of their column.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use td_types::{
    GeneratorError, Parameter, ParameterValue, Parameterization, RangeParameter, SearchSpace,
    TdResult, CONSTRAINT_TOLERANCE,
};

const FIXED_FEATURE_VALUE: f64 = 0.5;

/// Linear inequalities `A x <= b` over encoded columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraints {
    pub a: Vec<Vec<f64>>,
    pub b: Vec<f64>,
}

impl LinearConstraints {
    pub fn new(a: Vec<Vec<f64>>, b: Vec<f64>) -> Self {
        Self { a, b }
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_satisfied(&self, x: &[f64]) -> bool {
        self.a
            .iter()
            .zip(&self.b)
            .all(|(row, bound)| dot(row, x) <= bound + CONSTRAINT_TOLERANCE)
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[derive(Debug, Clone, PartialEq)]
enum Column {
    Range(RangeParameter),
    Choice {
        name: String,
        values: Vec<ParameterValue>,
    },
    Fixed {
        name: String,
        value: ParameterValue,
    },
}

impl Column {
    fn name(&self) -> &str {
        match self {
            Self::Range(p) => p.name(),
            Self::Choice { name, .. } | Self::Fixed { name, .. } => name,
        }
    }

    fn encode(&self, value: Option<&ParameterValue>) -> f64 {
        match (self, value) {
            (Self::Range(p), Some(v)) => match v.as_f64() {
                Some(x) => encode_range(p, x),
                None => 0.5,
            },
            (Self::Choice { values, .. }, Some(v)) => {
                match values.iter().position(|c| c.loosely_equals(v)) {
                    Some(idx) => (idx as f64 + 0.5) / values.len() as f64,
                    None => 0.5,
                }
            }
            _ => FIXED_FEATURE_VALUE,
        }
    }

    fn decode(&self, u: f64) -> ParameterValue {
        let u = u.clamp(0.0, 1.0);
        match self {
            Self::Range(p) => {
                let raw = decode_range(p, u);
                let value = p.value_from_f64(raw);
                if p.contains(&value) {
                    value
                } else {
                    ParameterValue::Float(raw)
                }
            }
            Self::Choice { values, .. } => {
                let k = values.len();
                let idx = ((u * k as f64).floor() as usize).min(k - 1);
                values[idx].clone()
            }
            Self::Fixed { value, .. } => value.clone(),
        }
    }
}

fn encode_range(p: &RangeParameter, x: f64) -> f64 {
    let u = if p.log_scale() {
        (x.ln() - p.lower().ln()) / (p.upper().ln() - p.lower().ln())
    } else {
        (x - p.lower()) / (p.upper() - p.lower())
    };
    u.clamp(0.0, 1.0)
}

fn decode_range(p: &RangeParameter, u: f64) -> f64 {
    let x = if p.log_scale() {
        (p.lower().ln() + u * (p.upper().ln() - p.lower().ln())).exp()
    } else {
        p.lower() + u * (p.upper() - p.lower())
    };
    x.clamp(p.lower(), p.upper())
}

/// Bidirectional map between parameterizations and unit-cube points.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpaceEncoding {
    space: SearchSpace,
    columns: Vec<Column>,
    constraints: LinearConstraints,
}

impl SearchSpaceEncoding {
    pub fn new(space: &SearchSpace) -> Self {
        let columns: Vec<Column> = space
            .parameters()
            .iter()
            .map(|p| match p {
                Parameter::Range(r) => Column::Range(r.clone()),
                Parameter::Choice(c) => Column::Choice {
                    name: c.name().to_string(),
                    values: c.values().to_vec(),
                },
                Parameter::Fixed(f) => Column::Fixed {
                    name: f.name().to_string(),
                    value: f.value().clone(),
                },
            })
            .collect();

        // Substituting x = lo + u * (hi - lo) turns w.x <= b into
        // (w * (hi - lo)).u <= b - w.lo.
        let mut constraints = LinearConstraints::default();
        for constraint in space.parameter_constraints() {
            let weights = constraint.constraint_dict();
            let mut row = vec![0.0; columns.len()];
            let mut bound = constraint.linear_bound();
            for (j, column) in columns.iter().enumerate() {
                if let (Column::Range(p), Some(w)) = (column, weights.get(column.name())) {
                    row[j] = w * (p.upper() - p.lower());
                    bound -= w * p.lower();
                }
            }
            constraints.a.push(row);
            constraints.b.push(bound);
        }

        Self {
            space: space.clone(),
            columns,
            constraints,
        }
    }

    pub fn dim(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        vec![(0.0, 1.0); self.columns.len()]
    }

    pub fn fixed_features(&self) -> BTreeMap<usize, f64> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Column::Fixed { .. }))
            .map(|(j, _)| (j, FIXED_FEATURE_VALUE))
            .collect()
    }

    pub fn linear_constraints(&self) -> &LinearConstraints {
        &self.constraints
    }

    /// Inactive or unknown values land in the middle of their column.
    pub fn encode(&self, values: &Parameterization) -> Vec<f64> {
        self.columns
            .iter()
            .map(|c| c.encode(values.get(c.name())))
            .collect()
    }

    /// Point back to a parameterization of the space, with inactive
    /// hierarchical parameters removed.
    pub fn decode(&self, x: &[f64]) -> TdResult<Parameterization> {
        if x.len() != self.columns.len() {
            return Err(GeneratorError::DimensionMismatch {
                expected: self.columns.len(),
                got: x.len(),
            }
            .into());
        }
        let raw: Parameterization = self
            .columns
            .iter()
            .zip(x)
            .map(|(c, u)| (c.name().to_string(), c.decode(*u)))
            .collect();
        Ok(self.space.cast(&raw)?)
    }

    /// Snap a point onto the values its columns can actually decode to.
    pub fn round(&self, x: &[f64]) -> Vec<f64> {
        self.columns
            .iter()
            .zip(x)
            .map(|(c, u)| c.encode(Some(&c.decode(*u))))
            .collect()
    }
}
