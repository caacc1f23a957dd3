//! Best-effort fan-out of review outcomes.
//!
//! Push messages go through a [`NotificationGateway`] (FCM in production); webhook
//! events through [`webhook::WebhookNotifier`]. Both run in spawned tasks after the
//! store write and never affect the outcome of the operation that queued them.

pub mod fcm;
pub mod webhook;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::metrics;
use crate::models::staging::SubmissionKind;
use webhook::{WebhookNotifier, WorkflowEvent};

pub const ADMIN_TOPIC: &str = "admin_notifications";
const CLICK_ACTION: &str = "FLUTTER_NOTIFICATION_CLICK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Topic(String),
    Device(String),
}

impl Target {
    /// Per-user topic the mobile app subscribes to after sign-in.
    pub fn user(external_ref: &str) -> Self {
        Target::Topic(format!("user_{external_ref}"))
    }

    pub fn admins() -> Self {
        Target::Topic(ADMIN_TOPIC.to_string())
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Topic(t) => write!(f, "topic:{t}"),
            Target::Device(_) => f.write_str("device"),
        }
    }
}

/// Title, body and string data payload of a push message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl Notice {
    pub fn new(title: impl Into<String>, body: impl Into<String>, kind: &str) -> Self {
        let mut data = BTreeMap::new();
        data.insert("type".to_string(), kind.to_string());
        data.insert("clickAction".to_string(), CLICK_ACTION.to_string());
        Self {
            title: title.into(),
            body: body.into(),
            data,
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn loan_approved(amount: &str, loan_id: uuid::Uuid, doc_id: &str) -> Self {
        Self::new(
            "✅ Loan Approved",
            format!("Your loan application for ₹{amount} has been approved!"),
            "loan_approved",
        )
        .with("loanId", loan_id)
        .with("firestoreDocId", doc_id)
    }

    pub fn insurance_approved(
        insurance_type: Option<&str>,
        insurance_id: uuid::Uuid,
        doc_id: &str,
    ) -> Self {
        Self::new(
            "✅ Insurance Application Approved",
            format!(
                "Your {} application has been approved!",
                insurance_type.unwrap_or("insurance")
            ),
            "insurance_approved",
        )
        .with("insuranceId", insurance_id)
        .with("firestoreDocId", doc_id)
    }

    pub fn ticket_created(subject: Option<&str>, ticket_id: uuid::Uuid, doc_id: &str) -> Self {
        Self::new(
            "🎫 Support Ticket Created",
            format!(
                "Your ticket \"{}\" has been created",
                subject.unwrap_or("Support Request")
            ),
            "ticket_created",
        )
        .with("ticketId", ticket_id)
        .with("firestoreDocId", doc_id)
    }

    /// `reason` is what the admin typed; `None` falls back to a generic line.
    pub fn rejected(kind: SubmissionKind, reason: Option<&str>, doc_id: &str) -> Self {
        let (title, fallback) = match kind {
            SubmissionKind::Loan => (
                "❌ Loan Application Update",
                "Your loan application was not approved",
            ),
            SubmissionKind::Insurance => (
                "❌ Insurance Application Update",
                "Your insurance application was not approved",
            ),
            SubmissionKind::Ticket | SubmissionKind::Chat => (
                "❌ Support Request Update",
                "Your support request was not accepted",
            ),
        };
        Self::new(
            title,
            reason.unwrap_or(fallback),
            &format!("{}_rejected", kind.as_str()),
        )
        .with("firestoreDocId", doc_id)
    }

    pub fn new_submission(kind: SubmissionKind, doc_id: &str) -> Self {
        Self::new(
            "📥 New Submission",
            format!("A new {} submission is waiting for review", kind.as_str()),
            "new_submission",
        )
        .with("firestoreDocId", doc_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The gateway is not configured; nothing left the process.
    Skipped,
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn send(&self, target: &Target, notice: &Notice) -> anyhow::Result<Delivery>;
}

/// Gateway used when no push credentials are configured.
pub struct DisabledGateway;

#[async_trait]
impl NotificationGateway for DisabledGateway {
    fn channel(&self) -> &'static str {
        "fcm"
    }

    async fn send(&self, target: &Target, notice: &Notice) -> anyhow::Result<Delivery> {
        tracing::debug!(target = %target, title = %notice.title, "push disabled, skipping notification");
        Ok(Delivery::Skipped)
    }
}

#[derive(Clone)]
pub struct Notifier {
    gateway: Arc<dyn NotificationGateway>,
    webhooks: WebhookNotifier,
    webhook_urls: Arc<Vec<String>>,
    webhook_secret: Option<Arc<str>>,
}

impl Notifier {
    pub fn new(
        gateway: Arc<dyn NotificationGateway>,
        webhooks: WebhookNotifier,
        webhook_urls: Vec<String>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            gateway,
            webhooks,
            webhook_urls: Arc::new(webhook_urls),
            webhook_secret: webhook_secret.map(Arc::from),
        }
    }

    /// Push only, no webhooks.
    pub fn push_only(gateway: Arc<dyn NotificationGateway>) -> Self {
        Self::new(gateway, WebhookNotifier::new(), Vec::new(), None)
    }

    /// Queue a push message. Failures are logged and counted, never returned.
    pub fn push(&self, target: Target, notice: Notice) -> JoinHandle<()> {
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            let channel = gateway.channel();
            match gateway.send(&target, &notice).await {
                Ok(Delivery::Sent) => {
                    tracing::info!(target = %target, kind = ?notice.data.get("type"), "notification sent");
                    metrics::record_notification(channel, "sent");
                }
                Ok(Delivery::Skipped) => metrics::record_notification(channel, "skipped"),
                Err(e) => {
                    tracing::warn!(target = %target, error = %e, "notification failed");
                    metrics::record_notification(channel, "failed");
                }
            }
        })
    }

    /// Push to the submitter's topic, or log and skip when the submission is anonymous.
    pub fn push_to_submitter(
        &self,
        external_ref: Option<&str>,
        notice: Notice,
    ) -> Option<JoinHandle<()>> {
        match external_ref.filter(|r| !r.is_empty()) {
            Some(r) => Some(self.push(Target::user(r), notice)),
            None => {
                tracing::info!(kind = ?notice.data.get("type"), "submission has no user, skipping notification");
                metrics::record_notification(self.gateway.channel(), "skipped");
                None
            }
        }
    }

    /// Deliver a webhook event to every configured URL, each independently.
    pub fn emit(&self, event: WorkflowEvent) -> Option<JoinHandle<()>> {
        if self.webhook_urls.is_empty() {
            return None;
        }
        let webhooks = self.webhooks.clone();
        let urls = self.webhook_urls.clone();
        let secret = self.webhook_secret.clone();

        Some(tokio::spawn(async move {
            for url in urls.iter() {
                match webhooks.send_signed(url, &event, secret.as_deref()).await {
                    Ok(()) => metrics::record_notification("webhook", "sent"),
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "webhook dispatch ultimately failed");
                        metrics::record_notification("webhook", "failed");
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(Target, Notice)>>,
    }

    #[async_trait]
    impl NotificationGateway for Recording {
        fn channel(&self) -> &'static str {
            "test"
        }

        async fn send(&self, target: &Target, notice: &Notice) -> anyhow::Result<Delivery> {
            self.sent
                .lock()
                .unwrap()
                .push((target.clone(), notice.clone()));
            Ok(Delivery::Sent)
        }
    }

    struct Failing;

    #[async_trait]
    impl NotificationGateway for Failing {
        fn channel(&self) -> &'static str {
            "failing-test"
        }

        async fn send(&self, _: &Target, _: &Notice) -> anyhow::Result<Delivery> {
            anyhow::bail!("gateway unreachable")
        }
    }

    #[test]
    fn test_approval_copy() {
        let id = uuid::Uuid::new_v4();
        let n = Notice::loan_approved("500000", id, "d1");
        assert_eq!(n.title, "✅ Loan Approved");
        assert_eq!(n.body, "Your loan application for ₹500000 has been approved!");
        assert_eq!(n.data["type"], "loan_approved");
        assert_eq!(n.data["clickAction"], "FLUTTER_NOTIFICATION_CLICK");
        assert_eq!(n.data["loanId"], id.to_string());

        let n = Notice::insurance_approved(None, id, "d1");
        assert_eq!(n.body, "Your insurance application has been approved!");

        let n = Notice::ticket_created(Some("Refund"), id, "d1");
        assert_eq!(n.body, "Your ticket \"Refund\" has been created");
    }

    #[test]
    fn test_rejection_copy() {
        let n = Notice::rejected(SubmissionKind::Loan, None, "d1");
        assert_eq!(n.title, "❌ Loan Application Update");
        assert_eq!(n.body, "Your loan application was not approved");
        assert_eq!(n.data["type"], "loan_rejected");

        let n = Notice::rejected(SubmissionKind::Insurance, Some("Missing documents"), "d1");
        assert_eq!(n.body, "Missing documents");
        assert_eq!(n.data["type"], "insurance_rejected");
    }

    #[tokio::test]
    async fn test_push_to_submitter_targets_user_topic() {
        let gateway = Arc::new(Recording::default());
        let notifier = Notifier::push_only(gateway.clone());
        notifier
            .push_to_submitter(Some("fb-1"), Notice::new("t", "b", "x"))
            .unwrap()
            .await
            .unwrap();
        assert!(notifier.push_to_submitter(None, Notice::new("t", "b", "x")).is_none());

        let sent = gateway.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Target::Topic("user_fb-1".into()));
    }

    #[tokio::test]
    async fn test_failures_are_swallowed_and_counted() {
        let before = metrics::notification_count("failing-test", "failed");
        let notifier = Notifier::push_only(Arc::new(Failing));
        notifier
            .push(Target::admins(), Notice::new("t", "b", "x"))
            .await
            .unwrap();
        assert_eq!(metrics::notification_count("failing-test", "failed"), before + 1);
    }
}
