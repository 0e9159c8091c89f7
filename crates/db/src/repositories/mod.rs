//! Zero-sized repositories over the distribution tables.
//!
//! Reads take a `&PgPool`; writes that must share a transaction take a
//! `&mut PgConnection` so callers can pass `&mut *tx`.

pub mod agent_repo;
pub mod assignment_repo;
pub mod lead_repo;
pub mod rotation_repo;
pub mod rule_repo;

pub use agent_repo::AgentRepo;
pub use assignment_repo::AssignmentRepo;
pub use lead_repo::LeadRepo;
pub use rotation_repo::RotationRepo;
pub use rule_repo::RuleRepo;
