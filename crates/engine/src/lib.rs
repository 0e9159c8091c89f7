//! Lead distribution engine.
//!
//! [`Orchestrator`] routes each incoming lead through the active
//! distribution rules and hands it to an agent, a manual queue, or the
//! unmatched bucket. Rules live in [`RuleStore`], agent pools in
//! [`AgentPool`], and selection algorithms in [`strategy`].

pub mod agent_pool;
pub mod analytics;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod rule_store;
pub mod strategy;
pub mod telemetry;

pub use agent_pool::AgentPool;
pub use analytics::DistributionAnalytics;
pub use config::{EngineConfig, LogFormat};
pub use error::{EngineError, EngineResult};
pub use orchestrator::{Orchestrator, Settled};
pub use rule_store::RuleStore;
pub use strategy::{AssignmentStrategy, Selection, StrategyRegistry};
