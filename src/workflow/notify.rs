//! Best-effort notification fan-out.
//!
//! The dispatcher is a detached task subscribed to the event bus. It is
//! fire-log-forget by contract: a failed or slow channel is logged at
//! `warn` and never retried, queued, or surfaced to the caller; the
//! transition that produced the event has already committed. Each party and
//! each channel is attempted independently, so one bad address cannot
//! starve the rest of the fan-out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use super::db::DbHandle;
use super::events::TicketEvent;
use super::models::{Person, Ticket, TicketStatus};

/// Upper bound on a single channel send. A stalled external API must not
/// stall the dispatcher loop behind it.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

const LINE_PUSH_URL: &str = "https://api.line.me/v2/bot/message/push";

#[async_trait]
pub trait EmailChannel: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn push(&self, to_user: &str, text: &str) -> anyhow::Result<()>;
}

/// Email via the plant's HTTP mail gateway. Template rendering lives in the
/// gateway; this client ships plain subject/body text.
pub struct MailGatewayClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    from: String,
}

impl MailGatewayClient {
    pub fn new(base_url: String, token: Option<String>, from: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
            from,
        }
    }
}

#[async_trait]
impl EmailChannel for MailGatewayClient {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let mut req = self.http.post(&url).json(&json!({
            "from": self.from,
            "to": to,
            "subject": subject,
            "body": body,
        }));
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        resp.error_for_status()?;
        Ok(())
    }
}

/// LINE Messaging API push client. Flex-message layout is out of scope;
/// pushes are plain text.
pub struct LineClient {
    http: reqwest::Client,
    push_url: String,
    channel_token: String,
}

impl LineClient {
    pub fn new(channel_token: String) -> Self {
        Self::with_push_url(LINE_PUSH_URL.to_string(), channel_token)
    }

    pub fn with_push_url(push_url: String, channel_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            push_url,
            channel_token,
        }
    }
}

#[async_trait]
impl PushChannel for LineClient {
    async fn push(&self, to_user: &str, text: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(&self.push_url)
            .bearer_auth(&self.channel_token)
            .json(&json!({
                "to": to_user,
                "messages": [{ "type": "text", "text": text }],
            }))
            .send()
            .await?;
        resp.error_for_status()?;
        Ok(())
    }
}

pub struct NotificationDispatcher {
    db: DbHandle,
    email: Option<Arc<dyn EmailChannel>>,
    push: Option<Arc<dyn PushChannel>>,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        db: DbHandle,
        email: Option<Arc<dyn EmailChannel>>,
        push: Option<Arc<dyn PushChannel>>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            db,
            email,
            push,
            send_timeout,
        }
    }

    /// Run the dispatcher until the bus closes. Detached from every request
    /// path: the HTTP response never waits on this task.
    pub fn spawn(self, mut rx: broadcast::Receiver<TicketEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.handle_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "notification dispatcher lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_event(&self, event: &TicketEvent) {
        let (subject, body, recipients) = match event {
            // Creation fan-out is deferred until images land; see the
            // media module and the TicketReported variant.
            TicketEvent::TicketCreated { ticket } => {
                debug!(ticket = %ticket.ticket_number, "creation event; notification deferred");
                return;
            }
            TicketEvent::TicketReported {
                ticket,
                image_count,
            } => {
                let subject = format!("[{}] New maintenance ticket: {}", ticket.ticket_number, ticket.title);
                let body = report_body(ticket, *image_count);
                let recipients = dedupe(vec![Some(ticket.reported_by), ticket.assigned_to]);
                (subject, body, recipients)
            }
            TicketEvent::TicketTransitioned {
                ticket,
                new_status,
                actor,
                notes,
                ..
            } => {
                let subject = format!(
                    "[{}] {}: {}",
                    ticket.ticket_number,
                    status_headline(*new_status),
                    ticket.title
                );
                let body = transition_body(ticket, *actor, notes.as_deref());
                let recipients = dedupe(vec![
                    Some(ticket.reported_by),
                    ticket.assigned_to,
                    ticket.escalated_to,
                ]);
                (subject, body, recipients)
            }
        };

        for person_id in recipients {
            let person = match self.db.call(move |db| db.get_person(person_id)).await {
                Ok(Some(p)) => p,
                Ok(None) => {
                    warn!(person_id, "notification recipient has no directory entry; skipping");
                    continue;
                }
                Err(e) => {
                    warn!(person_id, error = %e, "failed to load notification recipient; skipping");
                    continue;
                }
            };
            self.deliver(&person, &subject, &body).await;
        }
    }

    /// Attempt each configured channel for one person. Each send is
    /// independently timed out and logged; nothing propagates.
    async fn deliver(&self, person: &Person, subject: &str, body: &str) {
        let delivery = Uuid::new_v4();

        if let Some(ref email) = self.email {
            match &person.email {
                Some(address) => {
                    match tokio::time::timeout(self.send_timeout, email.send(address, subject, body))
                        .await
                    {
                        Ok(Ok(())) => {
                            debug!(%delivery, person = person.id, "email sent");
                        }
                        Ok(Err(e)) => {
                            warn!(%delivery, person = person.id, error = %e, "email send failed");
                        }
                        Err(_) => {
                            warn!(%delivery, person = person.id, "email send timed out");
                        }
                    }
                }
                None => debug!(%delivery, person = person.id, "no email address on file"),
            }
        }

        if let Some(ref push) = self.push {
            match &person.line_user_id {
                Some(line_id) => {
                    let text = format!("{}\n{}", subject, body);
                    match tokio::time::timeout(self.send_timeout, push.push(line_id, &text)).await {
                        Ok(Ok(())) => {
                            debug!(%delivery, person = person.id, "LINE push sent");
                        }
                        Ok(Err(e)) => {
                            warn!(%delivery, person = person.id, error = %e, "LINE push failed");
                        }
                        Err(_) => {
                            warn!(%delivery, person = person.id, "LINE push timed out");
                        }
                    }
                }
                None => debug!(%delivery, person = person.id, "no LINE id on file"),
            }
        }
    }
}

fn status_headline(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Open => "Ticket reassigned",
        TicketStatus::InProgress => "Ticket accepted",
        TicketStatus::RejectedPendingL3Review => "Ticket rejected, pending L3 review",
        TicketStatus::RejectedFinal => "Ticket rejected",
        TicketStatus::Escalated => "Ticket escalated",
        TicketStatus::Completed => "Work completed",
        TicketStatus::Closed => "Ticket closed",
        TicketStatus::ReopenedInProgress => "Ticket reopened",
    }
}

fn report_body(ticket: &Ticket, image_count: usize) -> String {
    let mut lines = vec![
        format!("Ticket: {}", ticket.ticket_number),
        format!("Title: {}", ticket.title),
        format!("Severity: {}", ticket.severity_level),
        format!("Priority: {}", ticket.priority),
    ];
    if let Some(puno) = ticket.puno {
        lines.push(format!("Equipment: {}", puno));
    }
    lines.push(format!("Images attached: {}", image_count));
    if !ticket.description.is_empty() {
        lines.push(String::new());
        lines.push(ticket.description.clone());
    }
    lines.join("\n")
}

fn transition_body(ticket: &Ticket, actor: i64, notes: Option<&str>) -> String {
    let mut lines = vec![
        format!("Ticket: {}", ticket.ticket_number),
        format!("Status: {}", ticket.status),
        format!("By: person {}", actor),
        format!("At: {}", ticket.updated_at),
    ];
    if let Some(reason) = ticket.rejection_reason.as_deref() {
        lines.push(format!("Rejection reason: {}", reason));
    }
    if let Some(reason) = ticket.escalation_reason.as_deref() {
        lines.push(format!("Escalation reason: {}", reason));
    }
    if let Some(hours) = ticket.actual_downtime_hours {
        lines.push(format!("Downtime hours: {}", hours));
    }
    if let Some(notes) = notes {
        lines.push(format!("Notes: {}", notes));
    }
    lines.join("\n")
}

fn dedupe(ids: Vec<Option<i64>>) -> Vec<i64> {
    let mut seen = Vec::new();
    for id in ids.into_iter().flatten() {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::db::WorkflowDb;
    use crate::workflow::events::EventBus;
    use crate::workflow::models::Priority;
    use std::sync::Mutex;

    struct RecordingEmail {
        sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl EmailChannel for RecordingEmail {
        async fn send(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    struct FailingEmail;

    #[async_trait]
    impl EmailChannel for FailingEmail {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
            anyhow::bail!("gateway 503")
        }
    }

    struct RecordingPush {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PushChannel for RecordingPush {
        async fn push(&self, to_user: &str, _text: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(to_user.to_string());
            Ok(())
        }
    }

    fn sample_ticket(reported_by: i64, assigned_to: Option<i64>) -> Ticket {
        Ticket {
            id: 1,
            ticket_number: "MT-000001".to_string(),
            status: TicketStatus::InProgress,
            title: "Pump 4 leaking".to_string(),
            description: "Seal worn".to_string(),
            reported_by,
            assigned_to,
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
            updated_at: "2026-01-01 00:10:00".to_string(),
        }
    }

    fn seeded_db() -> DbHandle {
        let handle = DbHandle::new(WorkflowDb::new_in_memory().unwrap());
        {
            let db = handle.lock_sync().unwrap();
            // Person ids are assigned 1, 2 in insertion order.
            db.create_person("Reporter", Some("reporter@plant.example"), Some("U-rep"))
                .unwrap();
            db.create_person("Tech", Some("tech@plant.example"), None)
                .unwrap();
        }
        handle
    }

    async fn wait_until(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_transition_fans_out_to_all_parties() {
        let db = seeded_db();
        let emails = Arc::new(Mutex::new(Vec::new()));
        let pushes = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = NotificationDispatcher::new(
            db,
            Some(Arc::new(RecordingEmail {
                sent: emails.clone(),
            })),
            Some(Arc::new(RecordingPush {
                sent: pushes.clone(),
            })),
            DEFAULT_SEND_TIMEOUT,
        );
        let bus = EventBus::default();
        let handle = dispatcher.spawn(bus.subscribe());

        bus.emit(TicketEvent::TicketTransitioned {
            ticket: sample_ticket(1, Some(2)),
            old_status: TicketStatus::Open,
            new_status: TicketStatus::InProgress,
            actor: 2,
            notes: None,
        });

        // Reporter and assignee both have email; only the reporter has LINE.
        wait_until(|| emails.lock().unwrap().len() == 2).await;
        wait_until(|| pushes.lock().unwrap().len() == 1).await;

        let sent = emails.lock().unwrap();
        assert!(sent.iter().any(|(to, _)| to == "reporter@plant.example"));
        assert!(sent.iter().any(|(to, _)| to == "tech@plant.example"));
        assert!(sent[0].1.contains("MT-000001"));
        drop(sent);

        handle.abort();
    }

    #[tokio::test]
    async fn test_email_failure_does_not_block_push() {
        let db = seeded_db();
        let pushes = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = NotificationDispatcher::new(
            db,
            Some(Arc::new(FailingEmail)),
            Some(Arc::new(RecordingPush {
                sent: pushes.clone(),
            })),
            DEFAULT_SEND_TIMEOUT,
        );
        let bus = EventBus::default();
        let handle = dispatcher.spawn(bus.subscribe());

        bus.emit(TicketEvent::TicketReported {
            ticket: sample_ticket(1, Some(2)),
            image_count: 3,
        });

        wait_until(|| pushes.lock().unwrap().len() == 1).await;
        assert_eq!(pushes.lock().unwrap()[0], "U-rep");

        handle.abort();
    }

    #[tokio::test]
    async fn test_creation_event_is_ignored() {
        let db = seeded_db();
        let emails = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = NotificationDispatcher::new(
            db,
            Some(Arc::new(RecordingEmail {
                sent: emails.clone(),
            })),
            None,
            DEFAULT_SEND_TIMEOUT,
        );
        let bus = EventBus::default();
        let handle = dispatcher.spawn(bus.subscribe());

        bus.emit(TicketEvent::TicketCreated {
            ticket: sample_ticket(1, None),
        });
        // Follow with a real event so we can observe ordering.
        bus.emit(TicketEvent::TicketReported {
            ticket: sample_ticket(1, None),
            image_count: 0,
        });

        wait_until(|| !emails.lock().unwrap().is_empty()).await;
        let sent = emails.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("New maintenance ticket"));
        drop(sent);

        handle.abort();
    }

    #[tokio::test]
    async fn test_unknown_recipient_is_skipped() {
        let db = DbHandle::new(WorkflowDb::new_in_memory().unwrap());
        let emails = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = NotificationDispatcher::new(
            db,
            Some(Arc::new(RecordingEmail {
                sent: emails.clone(),
            })),
            None,
            DEFAULT_SEND_TIMEOUT,
        );
        let bus = EventBus::default();
        let handle = dispatcher.spawn(bus.subscribe());

        // Nobody in the directory: the event is consumed without delivery.
        bus.emit(TicketEvent::TicketReported {
            ticket: sample_ticket(42, Some(43)),
            image_count: 1,
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(emails.lock().unwrap().is_empty());

        handle.abort();
    }

    #[test]
    fn test_dedupe_preserves_order_and_drops_nones() {
        assert_eq!(
            dedupe(vec![Some(1), Some(2), None, Some(1), Some(3)]),
            vec![1, 2, 3]
        );
        assert!(dedupe(vec![None, None]).is_empty());
    }

    #[test]
    fn test_report_body_mentions_images_and_equipment() {
        let body = report_body(&sample_ticket(1, None), 2);
        assert!(body.contains("Images attached: 2"));
        assert!(body.contains("Equipment: 88"));
        assert!(body.contains("Seal worn"));
    }
}
