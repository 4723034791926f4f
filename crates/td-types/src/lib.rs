pub mod errors;
pub mod metric;
pub mod objective;
pub mod optimization_config;
pub mod outcome_constraint;
pub mod parameter;
pub mod parameter_constraint;
pub mod search_space;
pub mod types;

pub use errors::*;
pub use metric::*;
pub use objective::*;
pub use optimization_config::*;
pub use outcome_constraint::*;
pub use parameter::*;
pub use parameter_constraint::*;
pub use search_space::*;
pub use types::*;
