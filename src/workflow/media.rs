//! Deferred-creation notifier.
//!
//! Ticket creation itself does not fan out the "new ticket" notification:
//! the reporter is usually still uploading photos, and a notification
//! without media is worse than a slightly later one. The image-attach
//! endpoints (single or batch) are the real trigger. The one-shot
//! `creation_notified_at` latch, claimed with a conditional update, makes
//! the notification exactly-once no matter how many upload calls arrive,
//! and `finalize_creation` covers tickets reported without any images.

use super::db::DbHandle;
use super::error::WorkflowError;
use super::events::{EventBus, TicketEvent};
use super::models::Attachment;

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub object_key: String,
    pub content_type: Option<String>,
}

#[derive(Clone)]
pub struct MediaService {
    db: DbHandle,
    bus: EventBus,
}

impl MediaService {
    pub fn new(db: DbHandle, bus: EventBus) -> Self {
        Self { db, bus }
    }

    /// Record uploaded image references for a ticket and, on the first
    /// upload, fire the deferred creation notification.
    pub async fn attach_images(
        &self,
        ticket_id: i64,
        uploads: Vec<ImageUpload>,
        uploaded_by: i64,
    ) -> Result<Vec<Attachment>, WorkflowError> {
        if uploads.is_empty() {
            return Err(WorkflowError::BadRequest(
                "at least one image is required".into(),
            ));
        }
        for upload in &uploads {
            if upload.object_key.trim().is_empty() {
                return Err(WorkflowError::BadRequest(
                    "image object_key must not be empty".into(),
                ));
            }
        }

        let attachments = self
            .db
            .call(move |db| {
                if db.get_ticket(ticket_id)?.is_none() {
                    return Err(WorkflowError::TicketNotFound { id: ticket_id });
                }
                let mut stored = Vec::with_capacity(uploads.len());
                for upload in &uploads {
                    stored.push(db.add_attachment(
                        ticket_id,
                        &upload.object_key,
                        upload.content_type.as_deref(),
                        uploaded_by,
                    )?);
                }
                Ok(stored)
            })
            .await?;

        self.finalize_creation(ticket_id).await?;
        Ok(attachments)
    }

    /// Claim the creation-notification latch. Returns true if this call
    /// fired the notification; false when it already went out. Safe to call
    /// any number of times, from upload handlers and the explicit finalize
    /// endpoint alike.
    pub async fn finalize_creation(&self, ticket_id: i64) -> Result<bool, WorkflowError> {
        let fired = self
            .db
            .call(move |db| {
                if db.get_ticket(ticket_id)?.is_none() {
                    return Err(WorkflowError::TicketNotFound { id: ticket_id });
                }
                db.claim_creation_notice(ticket_id)
            })
            .await?;
        if !fired {
            return Ok(false);
        }

        let (ticket, image_count) = self
            .db
            .call(move |db| {
                let ticket = db
                    .get_ticket(ticket_id)?
                    .ok_or(WorkflowError::TicketNotFound { id: ticket_id })?;
                let count = db.list_attachments(ticket_id)?.len();
                Ok((ticket, count))
            })
            .await?;
        self.bus.emit(TicketEvent::TicketReported {
            ticket,
            image_count,
        });
        Ok(true)
    }
}
