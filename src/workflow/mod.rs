//! Maintenance ticket workflow, the core of millwright.
//!
//! ## Overview
//!
//! Tickets move through a fixed approval/repair state machine. Every
//! transition is authorized against the actor's approval level (or party
//! identity), committed together with its audit-trail row, and fanned out
//! to notification channels strictly off the request path.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ TransitionEngine::accept()/reject()/…   │
//!                       │         v                                        │
//!                       │  engine.rs  (state machine, permission checks)   │
//!                       │         │                                        │
//!                       │         │ WorkflowDb::apply_transition()          │
//!                       │         v                                        │
//!                       │  db.rs  (conditional status update + history     │
//!                       │          append, one transaction)               │
//!                       │         │                                        │
//!                       │         │ EventBus::emit(TicketTransitioned)      │
//!                       │         v                                        │
//!                       │  events.rs ──> notify.rs  (email + LINE,         │
//!                       │            │              fire-log-forget)       │
//!                       │            └─> ws.rs      (ops board feed)       │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                         |
//! |---------------|--------------------------------------------------------|
//! | `models`      | `Ticket`, `TicketStatus`, `StatusHistoryEntry`, views  |
//! | `error`       | `WorkflowError` taxonomy                               |
//! | `permissions` | `PermissionResolver` trait + grants-table resolver     |
//! | `media`       | deferred-creation notifier (image attach + finalize)   |
//!
//! ## Typical Request Flow (accept a ticket)
//!
//! 1. `POST /api/tickets/{id}/accept` → `api::accept_ticket()`
//! 2. `TransitionEngine::accept()` loads the ticket, resolves the actor's
//!    approval level through `PermissionResolver`, and picks the required
//!    level for the observed from-state.
//! 3. `WorkflowDb::apply_transition()` runs
//!    `UPDATE tickets SET status = 'in_progress' WHERE id = ? AND status = ?`
//!    plus the history INSERT in one transaction. A zero-row update means
//!    the state moved underneath us: the caller gets `InvalidState` and
//!    nothing was written.
//! 4. The committed transition is emitted once on the `EventBus`; the
//!    notification dispatcher and the WebSocket feed each consume it on
//!    their own time. The HTTP response returns without waiting on either.

pub mod api;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod media;
pub mod models;
pub mod notify;
pub mod permissions;
pub mod server;
pub mod ws;
