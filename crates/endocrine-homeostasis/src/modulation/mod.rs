//! Signal-to-parameter modulation
//!
//! - `transform`: closed expression language evaluated per rule
//! - `rule`: what a signal type does to the parameter set
//! - `mapper`: precedence-ordered application with tightening guards

pub mod mapper;
pub mod rule;
pub mod transform;

pub use mapper::{level_table, MappingOutcome, ModulationMapper};
pub use rule::ModulationRule;
pub use transform::{EvalContext, Predicate, Transform, MAX_DEPTH, MAX_PREDICATES};
