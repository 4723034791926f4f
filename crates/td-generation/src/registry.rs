//! Instantiates generator back-ends from node specs and recorded state.

use crate::generator::{GeneratorBackend, GeneratorState};
use crate::neighborhood::NeighborhoodGenerator;
use crate::node::GeneratorSpec;
use crate::uniform::UniformGenerator;
use std::collections::BTreeMap;
use std::fmt;
use td_types::GeneratorError;

/// Builds a custom back-end from its node options and, when resuming, the
/// state recorded on the node's last generator run.
pub type GeneratorFactory = Box<
    dyn Fn(&serde_json::Value, Option<&serde_json::Value>) -> Result<Box<dyn GeneratorBackend>, GeneratorError>
        + Send
        + Sync,
>;

#[derive(Default)]
pub struct GeneratorRegistry {
    factories: BTreeMap<String, GeneratorFactory>,
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("custom", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value, Option<&serde_json::Value>) -> Result<Box<dyn GeneratorBackend>, GeneratorError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(key.into(), Box::new(factory));
    }

    pub fn with_generator<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&serde_json::Value, Option<&serde_json::Value>) -> Result<Box<dyn GeneratorBackend>, GeneratorError>
            + Send
            + Sync
            + 'static,
    {
        self.register(key, factory);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Built-in back-ends resume from a `GeneratorState`; state that does not
    /// parse as one starts a fresh sequence.
    pub fn instantiate(
        &self,
        spec: &GeneratorSpec,
        state: Option<&serde_json::Value>,
    ) -> Result<Box<dyn GeneratorBackend>, GeneratorError> {
        let recorded: Option<GeneratorState> =
            state.and_then(|s| serde_json::from_value(s.clone()).ok());
        match spec {
            GeneratorSpec::Uniform(config) => Ok(Box::new(match recorded {
                Some(state) => UniformGenerator::from_state(config, state),
                None => UniformGenerator::new(config),
            })),
            GeneratorSpec::Neighborhood(config) => Ok(Box::new(match recorded {
                Some(state) => NeighborhoodGenerator::from_state(config, state),
                None => NeighborhoodGenerator::new(config),
            })),
            GeneratorSpec::Custom { key, options } => {
                let factory = self
                    .factories
                    .get(key)
                    .ok_or_else(|| GeneratorError::UnknownGenerator { key: key.clone() })?;
                factory(options, state)
            }
        }
    }
}
