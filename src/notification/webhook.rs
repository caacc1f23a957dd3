use anyhow::Result;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::staging::StagingDocument;

// ── Webhook Event Types ───────────────────────────────────────

/// A review outcome pushed to operator webhooks (CRM sync, audit sinks).
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowEvent {
    /// e.g. "submission.approved", "submission.rejected", "submission.created".
    pub event_type: String,
    /// RFC 3339 timestamp of when the event occurred.
    pub timestamp: String,
    pub doc_id: String,
    /// "loan", "insurance", "ticket" or "chat".
    pub kind: String,
    /// External uid of the submitter, if any.
    pub user_ref: Option<String>,
    /// Event-specific details (record id, reason, actor).
    pub details: serde_json::Value,
}

impl WorkflowEvent {
    fn new(event_type: &str, doc: &StagingDocument, details: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            doc_id: doc.id.clone(),
            kind: doc.kind.to_string(),
            user_ref: doc.external_user_ref.clone(),
            details,
        }
    }

    pub fn approved(doc: &StagingDocument, record_id: uuid::Uuid, actor: &str) -> Self {
        Self::new(
            "submission.approved",
            doc,
            serde_json::json!({
                "record_id": record_id,
                "approved_by": actor,
            }),
        )
    }

    pub fn rejected(doc: &StagingDocument, reason: &str, actor: &str) -> Self {
        Self::new(
            "submission.rejected",
            doc,
            serde_json::json!({
                "reason": reason,
                "rejected_by": actor,
            }),
        )
    }

    pub fn created(doc: &StagingDocument) -> Self {
        Self::new("submission.created", doc, serde_json::json!({}))
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`, formatted as `sha256=<hex>`.
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Delivers workflow events to configured URLs.
/// - HMAC-SHA256 signing (`X-LoanZaar-Signature`) when a secret is configured
/// - Up to 3 retries with back-off (1s → 5s → 25s by default)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    backoff: Vec<Duration>,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self::with_backoff(
            [0, 1, 5, 25].into_iter().map(Duration::from_secs).collect(),
        )
    }

    /// Custom retry schedule; the first entry is the delay before the first attempt.
    pub fn with_backoff(backoff: Vec<Duration>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("LoanZaar-Webhook/1.0")
                .build()
                .unwrap_or_default(),
            backoff,
        }
    }

    /// Send one event to one URL, retrying on non-2xx and transport errors.
    pub async fn send_signed(
        &self,
        url: &str,
        event: &WorkflowEvent,
        signing_secret: Option<&str>,
    ) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = signing_secret.map(|s| hmac_sha256_hex(s, &payload));

        for (attempt, delay) in self.backoff.iter().enumerate() {
            if !delay.is_zero() {
                debug!(
                    url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(*delay).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-loanzaar-delivery-id", &delivery_id)
                .header("x-loanzaar-timestamp", &timestamp)
                .header("x-loanzaar-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-loanzaar-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        "webhook delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivery failed (non-2xx)"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "webhook delivery failed after {} attempts: {}",
            self.backoff.len(),
            url
        ))
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::staging::{StagingStatus, SubmissionKind};
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn doc() -> StagingDocument {
        let now = chrono::Utc::now();
        StagingDocument {
            id: "doc-9".into(),
            kind: SubmissionKind::Insurance,
            external_user_ref: Some("fb-1".into()),
            form_data: serde_json::json!({}),
            status: StagingStatus::Rejected,
            created_at: now,
            updated_at: now,
            migrated_at: None,
            record_id: None,
            rejection_reason: Some("Incomplete".into()),
            rejected_at: Some(now),
            rejected_by: Some("admin-1".into()),
        }
    }

    #[test]
    fn test_rejected_event_shape() {
        let event = WorkflowEvent::rejected(&doc(), "Incomplete", "admin-1");
        assert_eq!(event.event_type, "submission.rejected");
        assert_eq!(event.kind, "insurance");
        assert_eq!(event.details["reason"], "Incomplete");
        assert_eq!(event.details["rejected_by"], "admin-1");
    }

    #[test]
    fn test_hmac_signature_deterministic() {
        let sig1 = hmac_sha256_hex("secret123", b"payload");
        let sig2 = hmac_sha256_hex("secret123", b"payload");
        assert_eq!(sig1, sig2);
        assert!(sig1.starts_with("sha256="));
        assert_ne!(sig1, hmac_sha256_hex("secret124", b"payload"));
    }

    #[tokio::test]
    async fn test_signed_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-loanzaar-event", "submission.created"))
            .and(header_exists("x-loanzaar-signature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::with_backoff(vec![Duration::ZERO]);
        notifier
            .send_signed(
                &format!("{}/hook", server.uri()),
                &WorkflowEvent::created(&doc()),
                Some("s3cret"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_retries_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let notifier =
            WebhookNotifier::with_backoff(vec![Duration::ZERO, Duration::from_millis(5)]);
        let result = notifier
            .send_signed(&server.uri(), &WorkflowEvent::created(&doc()), None)
            .await;
        assert!(result.is_err());
    }
}
