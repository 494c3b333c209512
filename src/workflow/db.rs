use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, params};

use super::error::WorkflowError;
use super::models::*;

/// Async-safe handle to the workflow database.
///
/// Wraps `WorkflowDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads. The mutex serializes storage
/// access; the conditional status updates inside `apply_transition` guard
/// against stale reads made before the lock was taken.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<WorkflowDb>>,
}

impl DbHandle {
    pub fn new(db: WorkflowDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, WorkflowError>
    where
        F: FnOnce(&WorkflowDb) -> Result<R, WorkflowError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| WorkflowError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| WorkflowError::Database(anyhow::anyhow!("DB task panicked: {}", e)))?
    }

    /// Acquire the database mutex synchronously. For startup initialization,
    /// CLI commands, and tests. Not for hot async paths.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, WorkflowDb>, WorkflowError> {
        self.inner.lock().map_err(|_| WorkflowError::LockPoisoned)
    }
}

/// Parameters for ticket creation. Owned so it can cross into `DbHandle::call`.
#[derive(Debug, Clone, Default)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub reported_by: i64,
    pub assigned_to: Option<i64>,
    pub severity_level: i64,
    pub priority: Option<Priority>,
    pub puno: Option<i64>,
    pub estimated_downtime_hours: Option<f64>,
    pub schedule_finish: Option<String>,
}

/// Field writes carried by a transition, applied in the same transaction
/// as the status update. `Some(None)` on an id field clears it.
#[derive(Debug, Clone, Default)]
pub struct TransitionWrites {
    pub assigned_to: Option<Option<i64>>,
    pub escalated_to: Option<Option<i64>>,
    pub rejection_reason: Option<String>,
    pub escalation_reason: Option<String>,
    pub actual_downtime_hours: Option<f64>,
    pub satisfaction_rating: Option<i64>,
    /// Stamp resolved_at and actual_finish.
    pub set_resolved: bool,
    /// Stamp closed_at.
    pub set_closed: bool,
}

pub struct WorkflowDb {
    conn: Connection,
}

impl WorkflowDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, WorkflowError> {
        let conn = Connection::open(path)
            .context("Failed to open SQLite database")
            .map_err(WorkflowError::Database)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self, WorkflowError> {
        let conn = Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")
            .map_err(WorkflowError::Database)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<(), WorkflowError> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")
            .map_err(WorkflowError::Database)?;
        self.run_migrations()
    }

    fn run_migrations(&self) -> Result<(), WorkflowError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tickets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_number TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'open',
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    reported_by INTEGER NOT NULL,
                    assigned_to INTEGER,
                    escalated_to INTEGER,
                    rejection_reason TEXT,
                    escalation_reason TEXT,
                    severity_level INTEGER NOT NULL DEFAULT 3,
                    priority TEXT NOT NULL DEFAULT 'medium',
                    puno INTEGER,
                    estimated_downtime_hours REAL,
                    actual_downtime_hours REAL,
                    schedule_finish TEXT,
                    actual_finish TEXT,
                    resolved_at TEXT,
                    closed_at TEXT,
                    satisfaction_rating INTEGER,
                    creation_notified_at TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_tickets_number
                    ON tickets(ticket_number) WHERE ticket_number <> '';
                CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);

                CREATE TABLE IF NOT EXISTS status_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL REFERENCES tickets(id),
                    old_status TEXT,
                    new_status TEXT NOT NULL,
                    changed_by INTEGER NOT NULL,
                    notes TEXT,
                    changed_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_status_history_ticket
                    ON status_history(ticket_id);

                CREATE TABLE IF NOT EXISTS people (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT,
                    line_user_id TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS approval_grants (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    person_id INTEGER NOT NULL,
                    approval_level INTEGER NOT NULL,
                    plant TEXT,
                    area TEXT,
                    line TEXT,
                    machine TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_grants_person
                    ON approval_grants(person_id, is_active);

                CREATE TABLE IF NOT EXISTS attachments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL REFERENCES tickets(id),
                    object_key TEXT NOT NULL,
                    content_type TEXT,
                    uploaded_by INTEGER NOT NULL,
                    uploaded_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_attachments_ticket
                    ON attachments(ticket_id);
                ",
            )
            .context("Failed to create tables")
            .map_err(WorkflowError::Database)?;
        Ok(())
    }

    // ── Ticket creation ───────────────────────────────────────────────

    /// Insert a ticket in status `open`, assign its immutable ticket number,
    /// and write the creation history row, all in one transaction.
    pub fn create_ticket(&self, new: &NewTicket) -> Result<Ticket, WorkflowError> {
        if new.title.trim().is_empty() {
            return Err(WorkflowError::BadRequest("title must not be empty".into()));
        }
        if !(1..=5).contains(&new.severity_level) {
            return Err(WorkflowError::BadRequest(format!(
                "severity_level must be 1-5, got {}",
                new.severity_level
            )));
        }
        let priority = new.priority.unwrap_or(Priority::Medium);

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")
            .map_err(WorkflowError::Database)?;

        tx.execute(
            "INSERT INTO tickets (title, description, reported_by, assigned_to, severity_level,
                                  priority, puno, estimated_downtime_hours, schedule_finish)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                new.title,
                new.description,
                new.reported_by,
                new.assigned_to,
                new.severity_level,
                priority.as_str(),
                new.puno,
                new.estimated_downtime_hours,
                new.schedule_finish,
            ],
        )
        .context("Failed to insert ticket")
        .map_err(WorkflowError::Database)?;
        let id = self.conn.last_insert_rowid();

        let number = format!("MT-{:06}", id);
        tx.execute(
            "UPDATE tickets SET ticket_number = ?1 WHERE id = ?2",
            params![number, id],
        )
        .context("Failed to set ticket number")
        .map_err(WorkflowError::Database)?;

        tx.execute(
            "INSERT INTO status_history (ticket_id, old_status, new_status, changed_by)
             VALUES (?1, NULL, ?2, ?3)",
            params![id, TicketStatus::Open.as_str(), new.reported_by],
        )
        .context("Failed to write creation history")
        .map_err(WorkflowError::Database)?;

        tx.commit()
            .context("Failed to commit ticket creation")
            .map_err(WorkflowError::Database)?;

        self.get_ticket(id)?
            .ok_or(WorkflowError::TicketNotFound { id })
    }

    // ── Ticket reads ──────────────────────────────────────────────────

    const TICKET_COLUMNS: &'static str = "id, ticket_number, status, title, description, reported_by, \
         assigned_to, escalated_to, rejection_reason, escalation_reason, severity_level, priority, \
         puno, estimated_downtime_hours, actual_downtime_hours, schedule_finish, actual_finish, \
         resolved_at, closed_at, satisfaction_rating, creation_notified_at, created_at, updated_at";

    pub fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, WorkflowError> {
        let sql = format!(
            "SELECT {} FROM tickets WHERE id = ?1",
            Self::TICKET_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![id], Self::read_ticket_row)
            .optional()
            .context("Failed to query ticket")
            .map_err(WorkflowError::Database)?;
        row.map(TicketRow::into_ticket).transpose()
    }

    pub fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<Ticket>, WorkflowError> {
        let sql = match status {
            Some(_) => format!(
                "SELECT {} FROM tickets WHERE status = ?1 ORDER BY id",
                Self::TICKET_COLUMNS
            ),
            None => format!("SELECT {} FROM tickets ORDER BY id", Self::TICKET_COLUMNS),
        };
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_tickets")
            .map_err(WorkflowError::Database)?;

        let raw: Vec<rusqlite::Result<TicketRow>> = match status {
            Some(s) => stmt
                .query_map(params![s.as_str()], Self::read_ticket_row)
                .context("Failed to query tickets")
                .map_err(WorkflowError::Database)?
                .collect(),
            None => stmt
                .query_map([], Self::read_ticket_row)
                .context("Failed to query tickets")
                .map_err(WorkflowError::Database)?
                .collect(),
        };

        let mut tickets = Vec::new();
        for row in raw {
            let r = row
                .context("Failed to read ticket row")
                .map_err(WorkflowError::Database)?;
            tickets.push(r.into_ticket()?);
        }
        Ok(tickets)
    }

    fn read_ticket_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TicketRow> {
        Ok(TicketRow {
            id: row.get(0)?,
            ticket_number: row.get(1)?,
            status: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            reported_by: row.get(5)?,
            assigned_to: row.get(6)?,
            escalated_to: row.get(7)?,
            rejection_reason: row.get(8)?,
            escalation_reason: row.get(9)?,
            severity_level: row.get(10)?,
            priority: row.get(11)?,
            puno: row.get(12)?,
            estimated_downtime_hours: row.get(13)?,
            actual_downtime_hours: row.get(14)?,
            schedule_finish: row.get(15)?,
            actual_finish: row.get(16)?,
            resolved_at: row.get(17)?,
            closed_at: row.get(18)?,
            satisfaction_rating: row.get(19)?,
            creation_notified_at: row.get(20)?,
            created_at: row.get(21)?,
            updated_at: row.get(22)?,
        })
    }

    // ── Transitions ───────────────────────────────────────────────────

    /// Apply a status transition atomically.
    ///
    /// The status write is conditioned on the currently persisted status
    /// (`WHERE id = ? AND status = ?`), so a transition raced by a
    /// concurrent writer loses with `InvalidState` instead of clobbering
    /// the winner. The history row is written in the same transaction:
    /// both land or neither does.
    pub fn apply_transition(
        &self,
        id: i64,
        action: &'static str,
        expected: TicketStatus,
        new_status: TicketStatus,
        changed_by: i64,
        notes: Option<&str>,
        writes: &TransitionWrites,
    ) -> Result<Ticket, WorkflowError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")
            .map_err(WorkflowError::Database)?;

        let changed = tx
            .execute(
                "UPDATE tickets SET status = ?1, updated_at = datetime('now')
                 WHERE id = ?2 AND status = ?3",
                params![new_status.as_str(), id, expected.as_str()],
            )
            .context("Failed to update ticket status")
            .map_err(WorkflowError::Database)?;

        if changed == 0 {
            // Either the ticket is gone or its status moved underneath us.
            let current: Option<String> = tx
                .query_row("SELECT status FROM tickets WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })
                .optional()
                .context("Failed to re-read ticket status")
                .map_err(WorkflowError::Database)?;
            return match current {
                None => Err(WorkflowError::TicketNotFound { id }),
                Some(s) => Err(WorkflowError::InvalidState {
                    action,
                    status: parse_status(&s)?,
                }),
            };
        }

        if let Some(assigned) = writes.assigned_to {
            tx.execute(
                "UPDATE tickets SET assigned_to = ?1 WHERE id = ?2",
                params![assigned, id],
            )
            .context("Failed to update assignee")
            .map_err(WorkflowError::Database)?;
        }
        if let Some(escalated) = writes.escalated_to {
            tx.execute(
                "UPDATE tickets SET escalated_to = ?1 WHERE id = ?2",
                params![escalated, id],
            )
            .context("Failed to update escalation target")
            .map_err(WorkflowError::Database)?;
        }
        if let Some(ref reason) = writes.rejection_reason {
            tx.execute(
                "UPDATE tickets SET rejection_reason = ?1 WHERE id = ?2",
                params![reason, id],
            )
            .context("Failed to update rejection reason")
            .map_err(WorkflowError::Database)?;
        }
        if let Some(ref reason) = writes.escalation_reason {
            tx.execute(
                "UPDATE tickets SET escalation_reason = ?1 WHERE id = ?2",
                params![reason, id],
            )
            .context("Failed to update escalation reason")
            .map_err(WorkflowError::Database)?;
        }
        if let Some(hours) = writes.actual_downtime_hours {
            tx.execute(
                "UPDATE tickets SET actual_downtime_hours = ?1 WHERE id = ?2",
                params![hours, id],
            )
            .context("Failed to update downtime hours")
            .map_err(WorkflowError::Database)?;
        }
        if let Some(rating) = writes.satisfaction_rating {
            tx.execute(
                "UPDATE tickets SET satisfaction_rating = ?1 WHERE id = ?2",
                params![rating, id],
            )
            .context("Failed to update satisfaction rating")
            .map_err(WorkflowError::Database)?;
        }
        if writes.set_resolved {
            tx.execute(
                "UPDATE tickets SET resolved_at = datetime('now'), actual_finish = datetime('now')
                 WHERE id = ?1",
                params![id],
            )
            .context("Failed to stamp resolved_at")
            .map_err(WorkflowError::Database)?;
        }
        if writes.set_closed {
            tx.execute(
                "UPDATE tickets SET closed_at = datetime('now') WHERE id = ?1",
                params![id],
            )
            .context("Failed to stamp closed_at")
            .map_err(WorkflowError::Database)?;
        }

        tx.execute(
            "INSERT INTO status_history (ticket_id, old_status, new_status, changed_by, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, expected.as_str(), new_status.as_str(), changed_by, notes],
        )
        .context("Failed to append status history")
        .map_err(WorkflowError::Database)?;

        tx.commit()
            .context("Failed to commit transition")
            .map_err(WorkflowError::Database)?;

        self.get_ticket(id)?
            .ok_or(WorkflowError::TicketNotFound { id })
    }

    // ── Status history ────────────────────────────────────────────────

    /// Full ledger for a ticket in append order, creation event included.
    pub fn list_history(&self, ticket_id: i64) -> Result<Vec<StatusHistoryEntry>, WorkflowError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, ticket_id, old_status, new_status, changed_by, notes, changed_at
                 FROM status_history WHERE ticket_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_history")
            .map_err(WorkflowError::Database)?;
        let rows = stmt
            .query_map(params![ticket_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("Failed to query status history")
            .map_err(WorkflowError::Database)?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, ticket_id, old, new, changed_by, notes, changed_at) = row
                .context("Failed to read history row")
                .map_err(WorkflowError::Database)?;
            entries.push(StatusHistoryEntry {
                id,
                ticket_id,
                old_status: old.as_deref().map(parse_status).transpose()?,
                new_status: parse_status(&new)?,
                changed_by,
                notes,
                changed_at,
            });
        }
        Ok(entries)
    }

    // ── Deferred-creation latch ───────────────────────────────────────

    /// Claim the one-shot creation-notification latch for a ticket.
    /// Returns true exactly once; later calls see the stamp and return false.
    pub fn claim_creation_notice(&self, id: i64) -> Result<bool, WorkflowError> {
        let changed = self
            .conn
            .execute(
                "UPDATE tickets SET creation_notified_at = datetime('now')
                 WHERE id = ?1 AND creation_notified_at IS NULL",
                params![id],
            )
            .context("Failed to claim creation notice")
            .map_err(WorkflowError::Database)?;
        Ok(changed == 1)
    }

    // ── Attachments ───────────────────────────────────────────────────

    pub fn add_attachment(
        &self,
        ticket_id: i64,
        object_key: &str,
        content_type: Option<&str>,
        uploaded_by: i64,
    ) -> Result<Attachment, WorkflowError> {
        self.conn
            .execute(
                "INSERT INTO attachments (ticket_id, object_key, content_type, uploaded_by)
                 VALUES (?1, ?2, ?3, ?4)",
                params![ticket_id, object_key, content_type, uploaded_by],
            )
            .context("Failed to insert attachment")
            .map_err(WorkflowError::Database)?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT id, ticket_id, object_key, content_type, uploaded_by, uploaded_at
                 FROM attachments WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Attachment {
                        id: row.get(0)?,
                        ticket_id: row.get(1)?,
                        object_key: row.get(2)?,
                        content_type: row.get(3)?,
                        uploaded_by: row.get(4)?,
                        uploaded_at: row.get(5)?,
                    })
                },
            )
            .context("Attachment not found after insert")
            .map_err(WorkflowError::Database)
    }

    pub fn list_attachments(&self, ticket_id: i64) -> Result<Vec<Attachment>, WorkflowError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, ticket_id, object_key, content_type, uploaded_by, uploaded_at
                 FROM attachments WHERE ticket_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_attachments")
            .map_err(WorkflowError::Database)?;
        let rows = stmt
            .query_map(params![ticket_id], |row| {
                Ok(Attachment {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    object_key: row.get(2)?,
                    content_type: row.get(3)?,
                    uploaded_by: row.get(4)?,
                    uploaded_at: row.get(5)?,
                })
            })
            .context("Failed to query attachments")
            .map_err(WorkflowError::Database)?;
        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(
                row.context("Failed to read attachment row")
                    .map_err(WorkflowError::Database)?,
            );
        }
        Ok(attachments)
    }

    // ── People ────────────────────────────────────────────────────────

    pub fn create_person(
        &self,
        name: &str,
        email: Option<&str>,
        line_user_id: Option<&str>,
    ) -> Result<Person, WorkflowError> {
        self.conn
            .execute(
                "INSERT INTO people (name, email, line_user_id) VALUES (?1, ?2, ?3)",
                params![name, email, line_user_id],
            )
            .context("Failed to insert person")
            .map_err(WorkflowError::Database)?;
        let id = self.conn.last_insert_rowid();
        self.get_person(id)?
            .ok_or(WorkflowError::PersonNotFound { id })
    }

    pub fn get_person(&self, id: i64) -> Result<Option<Person>, WorkflowError> {
        self.conn
            .query_row(
                "SELECT id, name, email, line_user_id, created_at FROM people WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Person {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        line_user_id: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to query person")
            .map_err(WorkflowError::Database)
    }

    pub fn list_people(&self) -> Result<Vec<Person>, WorkflowError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, email, line_user_id, created_at FROM people ORDER BY id")
            .context("Failed to prepare list_people")
            .map_err(WorkflowError::Database)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Person {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    line_user_id: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .context("Failed to query people")
            .map_err(WorkflowError::Database)?;
        let mut people = Vec::new();
        for row in rows {
            people.push(
                row.context("Failed to read person row")
                    .map_err(WorkflowError::Database)?,
            );
        }
        Ok(people)
    }

    // ── Approval grants ───────────────────────────────────────────────

    pub fn create_grant(
        &self,
        person_id: i64,
        approval_level: i64,
        plant: Option<&str>,
        area: Option<&str>,
        line: Option<&str>,
        machine: Option<&str>,
    ) -> Result<ApprovalGrant, WorkflowError> {
        if !(1..=4).contains(&approval_level) {
            return Err(WorkflowError::BadRequest(format!(
                "approval_level must be 1-4, got {}",
                approval_level
            )));
        }
        self.conn
            .execute(
                "INSERT INTO approval_grants (person_id, approval_level, plant, area, line, machine)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![person_id, approval_level, plant, area, line, machine],
            )
            .context("Failed to insert grant")
            .map_err(WorkflowError::Database)?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT id, person_id, approval_level, plant, area, line, machine, is_active, created_at
                 FROM approval_grants WHERE id = ?1",
                params![id],
                Self::read_grant_row,
            )
            .context("Grant not found after insert")
            .map_err(WorkflowError::Database)
    }

    pub fn list_grants(&self, person_id: Option<i64>) -> Result<Vec<ApprovalGrant>, WorkflowError> {
        let sql = match person_id {
            Some(_) => {
                "SELECT id, person_id, approval_level, plant, area, line, machine, is_active, created_at
                 FROM approval_grants WHERE person_id = ?1 ORDER BY id"
            }
            None => {
                "SELECT id, person_id, approval_level, plant, area, line, machine, is_active, created_at
                 FROM approval_grants ORDER BY id"
            }
        };
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare list_grants")
            .map_err(WorkflowError::Database)?;

        let raw: Vec<rusqlite::Result<ApprovalGrant>> = match person_id {
            Some(pid) => stmt
                .query_map(params![pid], Self::read_grant_row)
                .context("Failed to query grants")
                .map_err(WorkflowError::Database)?
                .collect(),
            None => stmt
                .query_map([], Self::read_grant_row)
                .context("Failed to query grants")
                .map_err(WorkflowError::Database)?
                .collect(),
        };

        let mut grants = Vec::new();
        for row in raw {
            grants.push(
                row.context("Failed to read grant row")
                    .map_err(WorkflowError::Database)?,
            );
        }
        Ok(grants)
    }

    fn read_grant_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovalGrant> {
        Ok(ApprovalGrant {
            id: row.get(0)?,
            person_id: row.get(1)?,
            approval_level: row.get(2)?,
            plant: row.get(3)?,
            area: row.get(4)?,
            line: row.get(5)?,
            machine: row.get(6)?,
            is_active: row.get::<_, i64>(7)? != 0,
            created_at: row.get(8)?,
        })
    }

    /// Deactivate a grant. Grants are never deleted.
    pub fn revoke_grant(&self, id: i64) -> Result<bool, WorkflowError> {
        let changed = self
            .conn
            .execute(
                "UPDATE approval_grants SET is_active = 0 WHERE id = ?1",
                params![id],
            )
            .context("Failed to revoke grant")
            .map_err(WorkflowError::Database)?;
        Ok(changed > 0)
    }

    /// Highest active approval level for a person. Level 1 when no grant
    /// exists, since everyone may report. Scope columns are not consulted.
    pub fn max_active_level(&self, person_id: i64) -> Result<i64, WorkflowError> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(approval_level), 1) FROM approval_grants
                 WHERE person_id = ?1 AND is_active = 1",
                params![person_id],
                |row| row.get(0),
            )
            .context("Failed to resolve approval level")
            .map_err(WorkflowError::Database)
    }
}

fn parse_status(s: &str) -> Result<TicketStatus, WorkflowError> {
    TicketStatus::from_str(s).map_err(|e| WorkflowError::Database(anyhow::anyhow!(e)))
}

struct TicketRow {
    id: i64,
    ticket_number: String,
    status: String,
    title: String,
    description: String,
    reported_by: i64,
    assigned_to: Option<i64>,
    escalated_to: Option<i64>,
    rejection_reason: Option<String>,
    escalation_reason: Option<String>,
    severity_level: i64,
    priority: String,
    puno: Option<i64>,
    estimated_downtime_hours: Option<f64>,
    actual_downtime_hours: Option<f64>,
    schedule_finish: Option<String>,
    actual_finish: Option<String>,
    resolved_at: Option<String>,
    closed_at: Option<String>,
    satisfaction_rating: Option<i64>,
    creation_notified_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TicketRow {
    fn into_ticket(self) -> Result<Ticket, WorkflowError> {
        Ok(Ticket {
            id: self.id,
            ticket_number: self.ticket_number,
            status: parse_status(&self.status)?,
            title: self.title,
            description: self.description,
            reported_by: self.reported_by,
            assigned_to: self.assigned_to,
            escalated_to: self.escalated_to,
            rejection_reason: self.rejection_reason,
            escalation_reason: self.escalation_reason,
            severity_level: self.severity_level,
            priority: Priority::from_str(&self.priority)
                .map_err(|e| WorkflowError::Database(anyhow::anyhow!(e)))?,
            puno: self.puno,
            estimated_downtime_hours: self.estimated_downtime_hours,
            actual_downtime_hours: self.actual_downtime_hours,
            schedule_finish: self.schedule_finish,
            actual_finish: self.actual_finish,
            resolved_at: self.resolved_at,
            closed_at: self.closed_at,
            satisfaction_rating: self.satisfaction_rating,
            creation_notified_at: self.creation_notified_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
