//! Typed ticket event bus.
//!
//! The transition engine emits exactly one event per successful operation.
//! Subscribers are independent: the notification dispatcher fans events out
//! to email/LINE, and the WebSocket feed streams them to the ops board.
//! Emission never blocks and never fails the emitting operation.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::models::{Ticket, TicketStatus};

/// Default bus capacity. Slow subscribers lag rather than backpressure
/// the transition path.
pub const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TicketEvent {
    /// A ticket row exists. The full "new ticket" notification is deferred
    /// until images are attached (or creation is finalized), so the
    /// dispatcher ignores this variant.
    TicketCreated { ticket: Ticket },

    /// Deferred creation notification: images are in (or the reporter
    /// finalized without any). Fires at most once per ticket.
    TicketReported { ticket: Ticket, image_count: usize },

    /// A workflow transition committed.
    TicketTransitioned {
        ticket: Ticket,
        old_status: TicketStatus,
        new_status: TicketStatus,
        actor: i64,
        notes: Option<String>,
    },
}

impl TicketEvent {
    pub fn ticket(&self) -> &Ticket {
        match self {
            Self::TicketCreated { ticket }
            | Self::TicketReported { ticket, .. }
            | Self::TicketTransitioned { ticket, .. } => ticket,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TicketEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Returns silently when nobody is subscribed.
    pub fn emit(&self, event: TicketEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::models::Priority;

    fn sample_ticket() -> Ticket {
        Ticket {
            id: 1,
            ticket_number: "MT-000001".to_string(),
            status: TicketStatus::Open,
            title: "Pump 4 leaking".to_string(),
            description: String::new(),
            reported_by: 7,
            assigned_to: None,
            escalated_to: None,
            rejection_reason: None,
            escalation_reason: None,
            severity_level: 3,
            priority: Priority::Medium,
            puno: Some(88),
            estimated_downtime_hours: None,
            actual_downtime_hours: None,
            schedule_finish: None,
            actual_finish: None,
            resolved_at: None,
            closed_at: None,
            satisfaction_rating: None,
            creation_notified_at: None,
            created_at: "2026-01-01 00:00:00".to_string(),
            updated_at: "2026-01-01 00:00:00".to_string(),
        }
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = TicketEvent::TicketTransitioned {
            ticket: sample_ticket(),
            old_status: TicketStatus::Open,
            new_status: TicketStatus::InProgress,
            actor: 9,
            notes: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"TicketTransitioned\""));
        assert!(json.contains("\"data\""));
        assert!(json.contains("\"old_status\":\"open\""));
        assert!(json.contains("\"new_status\":\"in_progress\""));
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.emit(TicketEvent::TicketCreated {
            ticket: sample_ticket(),
        });
    }

    #[tokio::test]
    async fn test_subscribers_receive_emitted_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(TicketEvent::TicketReported {
            ticket: sample_ticket(),
            image_count: 2,
        });
        match rx.recv().await.unwrap() {
            TicketEvent::TicketReported { image_count, .. } => assert_eq!(image_count, 2),
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}
