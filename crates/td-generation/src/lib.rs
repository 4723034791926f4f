//! Candidate generation for Tandem experiments.
//!
//! A [`GenerationStrategy`] walks a graph of [`GenerationNode`]s, each backed
//! by a [`GeneratorBackend`] that proposes points in the unit-cube encoding
//! of the experiment's search space.

pub mod encoding;
pub mod generator;
pub mod neighborhood;
pub mod node;
pub mod polytope;
pub mod registry;
pub mod strategy;
pub mod training;
pub mod transition;
pub mod uniform;

pub use encoding::*;
pub use generator::*;
pub use neighborhood::*;
pub use node::*;
pub use polytope::*;
pub use registry::*;
pub use strategy::*;
pub use training::*;
pub use transition::*;
pub use uniform::*;
