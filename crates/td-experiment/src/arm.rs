use serde::{Deserialize, Serialize};
use td_types::Parameterization;

/// A named parameterization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    pub name: String,
    pub parameters: Parameterization,
}

impl Arm {
    pub fn new(name: impl Into<String>, parameters: Parameterization) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    /// Canonical key identifying the parameterization regardless of name.
    pub fn signature(&self) -> String {
        signature_of(&self.parameters)
    }
}

pub fn signature_of(parameters: &Parameterization) -> String {
    parameters
        .iter()
        .map(|(name, value)| format!("{name}={value:?}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Arm name for position `arm` within trial `trial`.
pub fn arm_name(trial: usize, arm: usize) -> String {
    format!("{trial}_{arm}")
}
