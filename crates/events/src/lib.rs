//! Distribution event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`DistributionEvent`]: the envelope for lead and rule events.
//! - [`EventAuditLog`]: background task that writes every event to the
//!   structured log.

pub mod audit;
pub mod bus;

pub use audit::EventAuditLog;
pub use bus::{event_types, DistributionEvent, EventBus};
