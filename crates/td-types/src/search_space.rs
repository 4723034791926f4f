//! Search spaces: parameters plus the linear constraints among them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

use crate::errors::ParameterError;
use crate::parameter::{Parameter, RangeParameter};
use crate::parameter_constraint::{validate_constraint_parameters, ParameterConstraint};
use crate::types::Parameterization;

/// Validated set of parameters and constraints.
///
/// Parameters keep their declaration order, which fixes the column order of
/// every encoding derived from the space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSearchSpace")]
pub struct SearchSpace {
    parameters: Vec<Parameter>,
    parameter_constraints: Vec<ParameterConstraint>,
}

#[derive(Deserialize)]
struct RawSearchSpace {
    parameters: Vec<Parameter>,
    #[serde(default)]
    parameter_constraints: Vec<ParameterConstraint>,
}

impl TryFrom<RawSearchSpace> for SearchSpace {
    type Error = ParameterError;

    fn try_from(raw: RawSearchSpace) -> Result<Self, Self::Error> {
        Self::new(raw.parameters, raw.parameter_constraints)
    }
}

impl SearchSpace {
    pub fn new(
        parameters: Vec<Parameter>,
        parameter_constraints: Vec<ParameterConstraint>,
    ) -> Result<Self, ParameterError> {
        let space = Self {
            parameters,
            parameter_constraints,
        };
        space.validate()?;
        Ok(space)
    }

    fn validate(&self) -> Result<(), ParameterError> {
        let mut seen = BTreeSet::new();
        for p in &self.parameters {
            if !seen.insert(p.name()) {
                return Err(ParameterError::DuplicateParameter {
                    name: p.name().to_string(),
                });
            }
        }

        for p in &self.parameters {
            for dependent in p.all_dependents() {
                if !seen.contains(dependent) {
                    return Err(ParameterError::UnknownDependent {
                        parameter: p.name().to_string(),
                        dependent: dependent.to_string(),
                    });
                }
            }
        }

        for constraint in &self.parameter_constraints {
            let mut referenced = Vec::new();
            for name in constraint.parameter_names() {
                let parameter = self
                    .parameter(name)
                    .ok_or_else(|| ParameterError::UnknownParameter {
                        name: name.to_string(),
                    })?;
                referenced.push(parameter);
            }
            validate_constraint_parameters(&referenced)?;
        }
        Ok(())
    }

    /// Returns a new space with `constraint` appended, revalidated.
    pub fn with_constraint(&self, constraint: ParameterConstraint) -> Result<Self, ParameterError> {
        let mut constraints = self.parameter_constraints.clone();
        constraints.push(constraint);
        Self::new(self.parameters.clone(), constraints)
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameter_constraints(&self) -> &[ParameterConstraint] {
        &self.parameter_constraints
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name()).collect()
    }

    pub fn range_parameters(&self) -> impl Iterator<Item = &RangeParameter> {
        self.parameters.iter().filter_map(Parameter::as_range)
    }

    pub fn is_hierarchical(&self) -> bool {
        self.parameters.iter().any(Parameter::is_hierarchical)
    }

    /// Parameters that are nobody's dependent.
    pub fn root_parameters(&self) -> Vec<&Parameter> {
        let dependents: BTreeSet<&str> = self
            .parameters
            .iter()
            .flat_map(|p| p.all_dependents())
            .collect();
        self.parameters
            .iter()
            .filter(|p| !dependents.contains(p.name()))
            .collect()
    }

    /// Names of the parameters that are active under `values`.
    ///
    /// Starts from the roots and follows the dependents selected by each
    /// active parameter's value. Flat spaces have every parameter active.
    pub fn active_parameters(&self, values: &Parameterization) -> BTreeSet<String> {
        let mut active = BTreeSet::new();
        let mut queue: VecDeque<&Parameter> = self.root_parameters().into_iter().collect();
        while let Some(p) = queue.pop_front() {
            if !active.insert(p.name().to_string()) {
                continue;
            }
            let selected = match (p, values.get(p.name())) {
                (Parameter::Fixed(_), _) => p.all_dependents(),
                (_, Some(value)) => p.dependents_for(value).iter().map(String::as_str).collect(),
                (_, None) => Vec::new(),
            };
            for name in selected {
                if let Some(dependent) = self.parameter(name) {
                    queue.push_back(dependent);
                }
            }
        }
        active
    }

    /// Membership check that reports the first violation.
    pub fn validate_membership(&self, values: &Parameterization) -> Result<(), ParameterError> {
        for name in values.keys() {
            if self.parameter(name).is_none() {
                return Err(ParameterError::UnknownParameter { name: name.clone() });
            }
        }

        let active = self.active_parameters(values);
        for name in &active {
            let Some(parameter) = self.parameter(name) else {
                continue;
            };
            let value = values
                .get(name)
                .ok_or_else(|| ParameterError::MissingValue { name: name.clone() })?;
            if !parameter.validate(value) {
                return Err(ParameterError::OutOfDomain {
                    name: name.clone(),
                    value: value.to_string(),
                });
            }
        }

        for constraint in &self.parameter_constraints {
            if !constraint
                .parameter_names()
                .iter()
                .all(|name| active.contains(*name))
            {
                continue;
            }
            if !constraint.check(values)? {
                return Err(ParameterError::ConstraintViolated {
                    constraint: constraint.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn check_membership(&self, values: &Parameterization) -> bool {
        self.validate_membership(values).is_ok()
    }

    /// Whether the point lies outside the space.
    pub fn out_of_design(&self, values: &Parameterization) -> bool {
        !self.check_membership(values)
    }

    /// Coerce values to each parameter's type and drop inactive entries.
    pub fn cast(&self, values: &Parameterization) -> Result<Parameterization, ParameterError> {
        let active = self.active_parameters(values);
        let mut cast = Parameterization::new();
        for (name, value) in values {
            let parameter = self
                .parameter(name)
                .ok_or_else(|| ParameterError::UnknownParameter { name: name.clone() })?;
            if active.contains(name) {
                cast.insert(name.clone(), parameter.cast(value)?);
            }
        }
        Ok(cast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::{ChoiceParameter, FixedParameter};
    use crate::parameter_constraint::{LinearConstraint, OrderConstraint};
    use crate::types::{ParameterType, ParameterValue};
    use std::collections::BTreeMap;

    fn flat_space() -> SearchSpace {
        let x1: Parameter = RangeParameter::float("x1", 0.1, 0.2).unwrap().into();
        let x2: Parameter = RangeParameter::float("x2", 1.0, 2.0).unwrap().into();
        let order = OrderConstraint::new(&x1, &x2).unwrap();
        SearchSpace::new(vec![x1, x2], vec![order.into()]).unwrap()
    }

    fn hierarchical_space() -> SearchSpace {
        let model = ChoiceParameter::new(
            "model",
            ParameterType::String,
            vec!["linear".into(), "tree".into()],
        )
        .unwrap()
        .with_dependents(vec![
            ("linear".into(), vec!["l2".to_string()]),
            ("tree".into(), vec!["depth".to_string()]),
        ])
        .unwrap();
        SearchSpace::new(
            vec![
                model.into(),
                RangeParameter::float("l2", 0.0, 1.0).unwrap().into(),
                RangeParameter::int("depth", 1, 10).unwrap().into(),
            ],
            vec![],
        )
        .unwrap()
    }

    fn values(pairs: &[(&str, ParameterValue)]) -> Parameterization {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn rejects_duplicates_and_unknown_constraint_parameters() {
        let x: Parameter = RangeParameter::float("x", 0.0, 1.0).unwrap().into();
        assert!(matches!(
            SearchSpace::new(vec![x.clone(), x.clone()], vec![]),
            Err(ParameterError::DuplicateParameter { .. })
        ));

        let constraint = LinearConstraint::new(BTreeMap::from([("z".to_string(), 1.0)]), 1.0);
        assert!(matches!(
            SearchSpace::new(vec![x.clone()], vec![constraint.into()]),
            Err(ParameterError::UnknownParameter { .. })
        ));

        let fixed: Parameter = FixedParameter::new("f", 1.0.into()).into();
        let constraint = LinearConstraint::new(BTreeMap::from([("f".to_string(), 1.0)]), 1.0);
        assert!(matches!(
            SearchSpace::new(vec![x, fixed], vec![constraint.into()]),
            Err(ParameterError::NonRangeConstraintParameter { .. })
        ));
    }

    #[test]
    fn membership_respects_constraints() {
        let space = flat_space();
        let ok = values(&[("x1", 0.15.into()), ("x2", 1.5.into())]);
        assert!(space.check_membership(&ok));

        let out_of_bounds = values(&[("x1", 0.5.into()), ("x2", 1.5.into())]);
        assert!(matches!(
            space.validate_membership(&out_of_bounds),
            Err(ParameterError::OutOfDomain { .. })
        ));
        assert!(space.out_of_design(&out_of_bounds));

        let missing = values(&[("x1", 0.15.into())]);
        assert!(matches!(
            space.validate_membership(&missing),
            Err(ParameterError::MissingValue { .. })
        ));
    }

    #[test]
    fn hierarchical_activity() {
        let space = hierarchical_space();
        assert!(space.is_hierarchical());
        let tree = values(&[("model", "tree".into()), ("depth", 3i64.into())]);
        let active = space.active_parameters(&tree);
        assert!(active.contains("depth"));
        assert!(!active.contains("l2"));
        assert!(space.check_membership(&tree));

        let with_inactive = values(&[
            ("model", "tree".into()),
            ("depth", 3.0.into()),
            ("l2", 0.5.into()),
        ]);
        let cast = space.cast(&with_inactive).unwrap();
        assert_eq!(cast.len(), 2);
        assert_eq!(cast["depth"], ParameterValue::Int(3));
    }
}
