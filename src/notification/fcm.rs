//! Firebase Cloud Messaging over the HTTP v1 API.
//!
//! Access tokens come from the service-account JWT-bearer grant and are cached
//! until shortly before they expire. A send is a single attempt.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{Delivery, Notice, NotificationGateway, Target};

pub const DEFAULT_FCM_BASE_URL: &str = "https://fcm.googleapis.com";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Refresh this long before the provider-reported expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The subset of a Google service-account key file this gateway needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccount {
    /// Parse the key file JSON. Escaped `\n` sequences in the private key
    /// (common when the JSON is pasted into an env var) are restored.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let mut sa: ServiceAccount =
            serde_json::from_str(raw).context("invalid FIREBASE_SERVICE_ACCOUNT JSON")?;
        sa.private_key = sa.private_key.replace("\\n", "\n");
        Ok(sa)
    }
}

pub enum Credentials {
    ServiceAccount(ServiceAccount),
    /// Pre-minted OAuth access token (local testing against an emulator).
    Static(String),
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct FcmGateway {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    credentials: Credentials,
    token: RwLock<Option<CachedToken>>,
}

impl FcmGateway {
    pub fn new(base_url: &str, project_id: &str, credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            credentials,
            token: RwLock::new(None),
        }
    }

    pub fn from_service_account(base_url: &str, sa: ServiceAccount) -> Self {
        let project_id = sa.project_id.clone();
        Self::new(base_url, &project_id, Credentials::ServiceAccount(sa))
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        let sa = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::ServiceAccount(sa) => sa,
        };

        if let Some(cached) = self.token.read().await.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &sa.client_email,
            scope: FCM_SCOPE,
            aud: &sa.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(sa.private_key.as_bytes())
            .context("service account private key is not a valid RSA PEM")?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)?;

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &assertion)
            .finish();

        let resp = self
            .client
            .post(&sa.token_uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .context("OAuth token request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OAuth token endpoint returned {}: {}", status, body);
        }

        let token: TokenResponse = resp.json().await.context("invalid OAuth token response")?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        tracing::debug!(expires_in = token.expires_in, "obtained FCM access token");

        *self.token.write().await = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn message(target: &Target, notice: &Notice) -> serde_json::Value {
        let mut message = serde_json::json!({
            "notification": { "title": notice.title, "body": notice.body },
            "data": notice.data,
        });
        match target {
            Target::Topic(topic) => message["topic"] = serde_json::json!(topic),
            Target::Device(token) => message["token"] = serde_json::json!(token),
        }
        serde_json::json!({ "message": message })
    }
}

#[async_trait]
impl NotificationGateway for FcmGateway {
    fn channel(&self) -> &'static str {
        "fcm"
    }

    async fn send(&self, target: &Target, notice: &Notice) -> anyhow::Result<Delivery> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, self.project_id
        );

        tracing::debug!(target = %target, "sending FCM message");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&Self::message(target, notice))
            .send()
            .await
            .context("failed to reach FCM")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("FCM returned error: status={}, body={}", status, body);
        }
        Ok(Delivery::Sent)
    }
}
