pub mod arm;
pub mod data;
pub mod experiment;
pub mod generator_run;
pub mod trial;

pub use arm::*;
pub use data::*;
pub use experiment::*;
pub use generator_run::*;
pub use trial::*;
