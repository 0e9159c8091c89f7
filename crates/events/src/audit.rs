//! Structured-log sink for distribution events.
//!
//! [`EventAuditLog`] subscribes to the bus and writes one log line per event,
//! so every assignment decision is visible in the service log even when no
//! other consumer is attached.

use tokio::sync::broadcast;

use crate::bus::DistributionEvent;

pub struct EventAuditLog;

impl EventAuditLog {
    /// Run until the bus is dropped.
    pub async fn run(mut receiver: broadcast::Receiver<DistributionEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => Self::log(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event audit log lagged, events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, audit log shutting down");
                    break;
                }
            }
        }
    }

    fn log(event: &DistributionEvent) {
        tracing::info!(
            target: "leadroute_events::audit",
            event_type = %event.event_type,
            lead_id = ?event.lead_id,
            rule_id = ?event.rule_id,
            user_id = ?event.user_id,
            payload = %event.payload,
            "Distribution event",
        );
    }
}
