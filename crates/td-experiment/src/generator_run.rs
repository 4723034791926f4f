use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use td_types::Parameterization;
use uuid::Uuid;

pub type GeneratorRunId = Uuid;

/// Record of one generator back-end invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorRun {
    pub id: GeneratorRunId,
    pub parameterizations: Vec<Parameterization>,
    pub weights: Vec<f64>,
    /// Registry key of the back-end that produced the run.
    pub generator_key: String,
    /// Generation node that was current when the run was produced.
    pub node_name: Option<String>,
    /// Back-end state after the run; enough to resume the sequence.
    pub gen_state: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub db_id: Option<i64>,
}

impl GeneratorRun {
    /// Unit weights for every parameterization.
    pub fn new(parameterizations: Vec<Parameterization>, generator_key: impl Into<String>) -> Self {
        let weights = vec![1.0; parameterizations.len()];
        Self::with_weights(parameterizations, weights, generator_key)
    }

    pub fn with_weights(
        parameterizations: Vec<Parameterization>,
        weights: Vec<f64>,
        generator_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            parameterizations,
            weights,
            generator_key: generator_key.into(),
            node_name: None,
            gen_state: None,
            created_at: Utc::now(),
            db_id: None,
        }
    }

    /// Run for parameterizations entered by hand.
    pub fn manual(parameterizations: Vec<Parameterization>) -> Self {
        Self::new(parameterizations, "manual")
    }

    pub fn with_node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    pub fn with_gen_state(mut self, gen_state: serde_json::Value) -> Self {
        self.gen_state = Some(gen_state);
        self
    }

    pub fn len(&self) -> usize {
        self.parameterizations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameterizations.is_empty()
    }
}
