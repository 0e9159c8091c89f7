//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! The engine publishes a [`DistributionEvent`] after every settled pass and
//! every rule change. Share the bus as `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use leadroute_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event names published by the engine.
pub mod event_types {
    pub const LEAD_ASSIGNED: &str = "lead.assigned";
    pub const LEAD_PENDING_MANUAL: &str = "lead.pending_manual";
    pub const LEAD_UNMATCHED: &str = "lead.unmatched";
    pub const LEAD_REVIEW_REQUIRED: &str = "lead.review_required";
    pub const RULE_CREATED: &str = "rule.created";
    pub const RULE_UPDATED: &str = "rule.updated";
    pub const RULE_DEACTIVATED: &str = "rule.deactivated";
    pub const RULE_ACTIVATED: &str = "rule.activated";
}

// ---------------------------------------------------------------------------
// DistributionEvent
// ---------------------------------------------------------------------------

/// Something that happened to a lead or a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionEvent {
    /// Dot-separated name, one of [`event_types`].
    pub event_type: String,
    pub lead_id: Option<DbId>,
    pub rule_id: Option<DbId>,
    /// User who received the lead, for assignment events.
    pub user_id: Option<DbId>,
    /// Free-form JSON carrying event-specific data.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl DistributionEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            lead_id: None,
            rule_id: None,
            user_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_lead(mut self, lead_id: DbId) -> Self {
        self.lead_id = Some(lead_id);
        self
    }

    /// Attach a rule, if the event has one.
    pub fn with_rule(mut self, rule_id: Option<DbId>) -> Self {
        self.rule_id = rule_id;
        self
    }

    pub fn with_user(mut self, user_id: DbId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Events buffered per subscriber before the slowest one starts lagging.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out of [`DistributionEvent`]s to every live subscriber.
///
/// Publishing never blocks a distribution pass. A subscriber that falls
/// more than `capacity` events behind loses the oldest ones and sees
/// `RecvError::Lagged` on its next receive.
///
/// ```rust
/// use leadroute_events::bus::{event_types, DistributionEvent, EventBus};
///
/// let bus = EventBus::new(64);
/// let mut audit = bus.subscribe();
/// bus.publish(DistributionEvent::new(event_types::LEAD_UNMATCHED).with_lead(9));
/// assert_eq!(audit.try_recv().unwrap().lead_id, Some(9));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<DistributionEvent>,
}

impl EventBus {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Hand `event` to current subscribers; with none, it is discarded.
    pub fn publish(&self, event: DistributionEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No subscribers for distribution event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DistributionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    #[tokio::test]
    async fn assignment_event_carries_lead_rule_and_user() {
        let bus = EventBus::default();
        let mut audit = bus.subscribe();

        bus.publish(
            DistributionEvent::new(event_types::LEAD_ASSIGNED)
                .with_lead(42)
                .with_rule(Some(3))
                .with_user(7)
                .with_payload(serde_json::json!({"strategy": "round_robin", "rotation_cursor": 5})),
        );

        let event = audit.recv().await.unwrap();
        assert_eq!(event.event_type, "lead.assigned");
        assert_eq!((event.lead_id, event.rule_id, event.user_id), (Some(42), Some(3), Some(7)));
        assert_eq!(event.payload["rotation_cursor"], 5);
    }

    #[tokio::test]
    async fn every_subscriber_sees_rule_changes() {
        let bus = EventBus::default();
        let mut dashboard = bus.subscribe();
        let mut audit = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(DistributionEvent::new(event_types::RULE_DEACTIVATED).with_rule(Some(11)));

        for rx in [&mut dashboard, &mut audit] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.event_type, event_types::RULE_DEACTIVATED);
            assert_eq!(event.lead_id, None);
        }
    }

    #[test]
    fn events_without_listeners_are_dropped() {
        let bus = EventBus::new(0);
        bus.publish(DistributionEvent::new(event_types::LEAD_UNMATCHED));

        let mut late = bus.subscribe();
        assert_matches::assert_matches!(late.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn slow_subscriber_observes_lag() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe();
        for lead_id in 1..=3 {
            bus.publish(DistributionEvent::new(event_types::LEAD_PENDING_MANUAL).with_lead(lead_id));
        }

        assert_eq!(slow.recv().await.unwrap_err(), RecvError::Lagged(1));
        assert_eq!(slow.recv().await.unwrap().lead_id, Some(2));
    }
}
