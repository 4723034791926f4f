//! Best-point and Pareto-frontier selection over experiment outcomes.

pub mod best;
pub mod pareto;

pub use best::*;
pub use pareto::*;
