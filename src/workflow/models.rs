use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Workflow status of a maintenance ticket.
///
/// This is the single closed vocabulary driven by the transition engine.
/// `RejectedFinal` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    RejectedPendingL3Review,
    RejectedFinal,
    Escalated,
    Completed,
    Closed,
    ReopenedInProgress,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::RejectedPendingL3Review => "rejected_pending_l3_review",
            Self::RejectedFinal => "rejected_final",
            Self::Escalated => "escalated",
            Self::Completed => "completed",
            Self::Closed => "closed",
            Self::ReopenedInProgress => "reopened_in_progress",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RejectedFinal | Self::Closed)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "rejected_pending_l3_review" => Ok(Self::RejectedPendingL3Review),
            "rejected_final" => Ok(Self::RejectedFinal),
            "escalated" => Ok(Self::Escalated),
            "completed" => Ok(Self::Completed),
            "closed" => Ok(Self::Closed),
            "reopened_in_progress" => Ok(Self::ReopenedInProgress),
            _ => Err(format!("Invalid ticket status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// A maintenance ticket.
///
/// `ticket_number` and `reported_by` are immutable after creation;
/// `status` and `assigned_to` change only through the transition engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub ticket_number: String,
    pub status: TicketStatus,
    pub title: String,
    pub description: String,
    pub reported_by: i64,
    pub assigned_to: Option<i64>,
    pub escalated_to: Option<i64>,
    pub rejection_reason: Option<String>,
    pub escalation_reason: Option<String>,
    pub severity_level: i64,
    pub priority: Priority,
    /// Plant equipment reference. Opaque to the workflow core.
    pub puno: Option<i64>,
    pub estimated_downtime_hours: Option<f64>,
    pub actual_downtime_hours: Option<f64>,
    pub schedule_finish: Option<String>,
    pub actual_finish: Option<String>,
    pub resolved_at: Option<String>,
    pub closed_at: Option<String>,
    pub satisfaction_rating: Option<i64>,
    /// Set once the deferred "ticket created" notification has fired.
    pub creation_notified_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One row of the append-only status history ledger.
///
/// `old_status` is None for the creation event only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub ticket_id: i64,
    pub old_status: Option<TicketStatus>,
    pub new_status: TicketStatus,
    pub changed_by: i64,
    pub notes: Option<String>,
    pub changed_at: String,
}

/// An approval grant held by a person.
///
/// Scope columns narrow the grant (plant > area > line > machine); a NULL
/// column means the grant applies at the broader level. Scope is stored but
/// not enforced by transition checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalGrant {
    pub id: i64,
    pub person_id: i64,
    pub approval_level: i64,
    pub plant: Option<String>,
    pub area: Option<String>,
    pub line: Option<String>,
    pub machine: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

/// Contact directory entry consumed by the notification dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub line_user_id: Option<String>,
    pub created_at: String,
}

/// Reference to an uploaded ticket image. The image store itself is
/// external; the core records object keys only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub ticket_id: i64,
    pub object_key: String,
    pub content_type: Option<String>,
    pub uploaded_by: i64,
    pub uploaded_at: String,
}

// API view types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketDetail {
    pub ticket: Ticket,
    pub history: Vec<StatusHistoryEntry>,
    pub attachments: Vec<Attachment>,
}
