//! The ticket transition engine.
//!
//! One method per workflow action. Every method follows the same contract:
//! resolve the ticket (`TicketNotFound`), check the actor requirement
//! (`PermissionDenied`), then hand the write to
//! [`WorkflowDb::apply_transition`], whose conditional status update
//! re-verifies the from-state against the persisted row, so a transition
//! raced by a concurrent writer loses with `InvalidState`. On success the
//! status write and history append have committed together and exactly one
//! event is emitted on the bus.

use std::sync::Arc;

use tracing::debug;

use super::db::{DbHandle, NewTicket, TransitionWrites};
use super::error::WorkflowError;
use super::events::{EventBus, TicketEvent};
use super::models::{Ticket, TicketStatus};
use super::permissions::PermissionResolver;

/// States an L3 final reject may leave from: every non-terminal state that
/// has not reached the completed/closed tail.
const REJECTABLE: [TicketStatus; 5] = [
    TicketStatus::Open,
    TicketStatus::InProgress,
    TicketStatus::ReopenedInProgress,
    TicketStatus::RejectedPendingL3Review,
    TicketStatus::Escalated,
];

#[derive(Clone)]
pub struct TransitionEngine {
    db: DbHandle,
    permissions: Arc<dyn PermissionResolver>,
    bus: EventBus,
}

impl TransitionEngine {
    pub fn new(db: DbHandle, permissions: Arc<dyn PermissionResolver>, bus: EventBus) -> Self {
        Self {
            db,
            permissions,
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Create a ticket in status `open`. Any reporter may create; an
    /// optional pre-assignment sets `assigned_to` without changing status.
    /// Emits `TicketCreated` only; the full creation notification is
    /// deferred until images are attached (see the media module).
    pub async fn create(&self, new: NewTicket) -> Result<Ticket, WorkflowError> {
        let ticket = self.db.call(move |db| db.create_ticket(&new)).await?;
        debug!(ticket = %ticket.ticket_number, "ticket created");
        self.bus.emit(TicketEvent::TicketCreated {
            ticket: ticket.clone(),
        });
        Ok(ticket)
    }

    /// Take ownership of a ticket. L2+ from `open` or
    /// `reopened_in_progress`; L3+ from `rejected_pending_l3_review`.
    pub async fn accept(&self, id: i64, actor: i64) -> Result<Ticket, WorkflowError> {
        let ticket = self.load(id).await?;
        let required = match ticket.status {
            TicketStatus::Open | TicketStatus::ReopenedInProgress => 2,
            TicketStatus::RejectedPendingL3Review => 3,
            other => {
                return Err(WorkflowError::InvalidState {
                    action: "accept",
                    status: other,
                });
            }
        };
        if !self.permissions.has_level(actor, required).await? {
            return Err(WorkflowError::denied(format!(
                "accept from '{}' requires approval level {} or higher",
                ticket.status, required
            )));
        }

        let writes = TransitionWrites {
            assigned_to: Some(Some(actor)),
            ..Default::default()
        };
        self.apply(id, "accept", ticket.status, TicketStatus::InProgress, actor, None, writes)
            .await
    }

    /// Reject a ticket. Below level 3 the rejection must escalate to L3
    /// review and is only valid from `open`/`in_progress`; level 3+
    /// rejects to the terminal `rejected_final` from any rejectable state.
    pub async fn reject(
        &self,
        id: i64,
        actor: i64,
        reason: String,
        escalate_to_l3: bool,
    ) -> Result<Ticket, WorkflowError> {
        if reason.trim().is_empty() {
            return Err(WorkflowError::BadRequest(
                "rejection reason must not be empty".into(),
            ));
        }
        let ticket = self.load(id).await?;
        let level = self.permissions.approval_level(actor).await?;

        let new_status = if level >= 3 {
            if !REJECTABLE.contains(&ticket.status) {
                return Err(WorkflowError::InvalidState {
                    action: "reject",
                    status: ticket.status,
                });
            }
            TicketStatus::RejectedFinal
        } else if escalate_to_l3 {
            match ticket.status {
                TicketStatus::Open | TicketStatus::InProgress => {}
                other => {
                    return Err(WorkflowError::InvalidState {
                        action: "reject",
                        status: other,
                    });
                }
            }
            TicketStatus::RejectedPendingL3Review
        } else {
            return Err(WorkflowError::denied(
                "final reject requires approval level 3; lower levels must escalate to L3 review",
            ));
        };

        let writes = TransitionWrites {
            rejection_reason: Some(reason.clone()),
            ..Default::default()
        };
        self.apply(id, "reject", ticket.status, new_status, actor, Some(reason), writes)
            .await
    }

    /// Mark an in-progress ticket done. Assignee only.
    pub async fn complete(
        &self,
        id: i64,
        actor: i64,
        actual_downtime_hours: f64,
        notes: Option<String>,
    ) -> Result<Ticket, WorkflowError> {
        if !actual_downtime_hours.is_finite() || actual_downtime_hours < 0.0 {
            return Err(WorkflowError::BadRequest(format!(
                "actual_downtime_hours must be a non-negative number, got {}",
                actual_downtime_hours
            )));
        }
        let ticket = self.load(id).await?;
        if ticket.assigned_to != Some(actor) {
            return Err(WorkflowError::denied(
                "complete is allowed only for the current assignee",
            ));
        }

        let writes = TransitionWrites {
            actual_downtime_hours: Some(actual_downtime_hours),
            set_resolved: true,
            ..Default::default()
        };
        self.apply(
            id,
            "complete",
            TicketStatus::InProgress,
            TicketStatus::Completed,
            actor,
            notes,
            writes,
        )
        .await
    }

    /// Hand an in-progress ticket to a higher-authority target. Assignee only.
    pub async fn escalate(
        &self,
        id: i64,
        actor: i64,
        target: i64,
        reason: String,
    ) -> Result<Ticket, WorkflowError> {
        if reason.trim().is_empty() {
            return Err(WorkflowError::BadRequest(
                "escalation reason must not be empty".into(),
            ));
        }
        let ticket = self.load(id).await?;
        if ticket.assigned_to != Some(actor) {
            return Err(WorkflowError::denied(
                "escalate is allowed only for the current assignee",
            ));
        }

        let writes = TransitionWrites {
            escalated_to: Some(Some(target)),
            escalation_reason: Some(reason.clone()),
            ..Default::default()
        };
        self.apply(
            id,
            "escalate",
            TicketStatus::InProgress,
            TicketStatus::Escalated,
            actor,
            Some(reason),
            writes,
        )
        .await
    }

    /// Close a completed ticket. Reporter only.
    pub async fn close(
        &self,
        id: i64,
        actor: i64,
        reason: Option<String>,
        satisfaction_rating: Option<i64>,
    ) -> Result<Ticket, WorkflowError> {
        if let Some(rating) = satisfaction_rating
            && !(1..=5).contains(&rating)
        {
            return Err(WorkflowError::BadRequest(format!(
                "satisfaction_rating must be 1-5, got {}",
                rating
            )));
        }
        let ticket = self.load(id).await?;
        if ticket.reported_by != actor {
            return Err(WorkflowError::denied(
                "close is allowed only for the reporter",
            ));
        }

        let writes = TransitionWrites {
            satisfaction_rating,
            set_closed: true,
            ..Default::default()
        };
        self.apply(
            id,
            "close",
            TicketStatus::Completed,
            TicketStatus::Closed,
            actor,
            reason,
            writes,
        )
        .await
    }

    /// Reopen a completed ticket for further work. Reporter only.
    pub async fn reopen(
        &self,
        id: i64,
        actor: i64,
        reason: Option<String>,
    ) -> Result<Ticket, WorkflowError> {
        let ticket = self.load(id).await?;
        if ticket.reported_by != actor {
            return Err(WorkflowError::denied(
                "reopen is allowed only for the reporter",
            ));
        }

        self.apply(
            id,
            "reopen",
            TicketStatus::Completed,
            TicketStatus::ReopenedInProgress,
            actor,
            reason,
            TransitionWrites::default(),
        )
        .await
    }

    /// Redirect ownership of a stalled ticket back to `open`. L3+ only,
    /// from `rejected_pending_l3_review` or `escalated`.
    pub async fn reassign(
        &self,
        id: i64,
        actor: i64,
        new_assignee: i64,
        reason: Option<String>,
    ) -> Result<Ticket, WorkflowError> {
        if !self.permissions.has_level(actor, 3).await? {
            return Err(WorkflowError::denied(
                "reassign requires approval level 3 or higher",
            ));
        }
        let ticket = self.load(id).await?;
        match ticket.status {
            TicketStatus::RejectedPendingL3Review | TicketStatus::Escalated => {}
            other => {
                return Err(WorkflowError::InvalidState {
                    action: "reassign",
                    status: other,
                });
            }
        }

        let writes = TransitionWrites {
            assigned_to: Some(Some(new_assignee)),
            escalated_to: Some(None),
            ..Default::default()
        };
        self.apply(id, "reassign", ticket.status, TicketStatus::Open, actor, reason, writes)
            .await
    }

    async fn load(&self, id: i64) -> Result<Ticket, WorkflowError> {
        self.db
            .call(move |db| db.get_ticket(id))
            .await?
            .ok_or(WorkflowError::TicketNotFound { id })
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        id: i64,
        action: &'static str,
        expected: TicketStatus,
        new_status: TicketStatus,
        actor: i64,
        notes: Option<String>,
        writes: TransitionWrites,
    ) -> Result<Ticket, WorkflowError> {
        let db_notes = notes.clone();
        let ticket = self
            .db
            .call(move |db| {
                db.apply_transition(
                    id,
                    action,
                    expected,
                    new_status,
                    actor,
                    db_notes.as_deref(),
                    &writes,
                )
            })
            .await?;

        debug!(
            ticket = %ticket.ticket_number,
            action,
            from = %expected,
            to = %new_status,
            actor,
            "transition committed"
        );
        self.bus.emit(TicketEvent::TicketTransitioned {
            ticket: ticket.clone(),
            old_status: expected,
            new_status,
            actor,
            notes,
        });
        Ok(ticket)
    }
}
