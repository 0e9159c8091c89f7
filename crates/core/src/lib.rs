//! Domain core of the lead distribution engine.
//!
//! Pure types and functions with zero internal dependencies, shared by the
//! storage layer and the engine: leads and their distribution state machine,
//! rules and their typed conditions, rule agents, selection arithmetic,
//! assignment records, and summary types.

#[macro_use]
mod macros;

pub mod agent;
pub mod analytics;
pub mod assignment;
pub mod condition;
pub mod error;
pub mod lead;
pub mod legacy_condition;
pub mod rule;
pub mod selection;
pub mod types;
