//! Firebase ID token verification against Google's securetoken JWKS.
//!
//! Workflow:
//! 1. Decode header → find the matching `kid` in the cached key set
//! 2. On a miss (or stale cache) refetch the key set, at most once per minute
//! 3. Verify signature, expiry, audience (project id), issuer
//!
//! Keys are cached in-memory with a 1-hour TTL.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use super::AuthError;
use crate::models::principal::Principal;

pub const GOOGLE_SECURETOKEN_JWKS: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const JWKS_CACHE_TTL_SECS: i64 = 3600;
/// Unknown `kid`s arrive before authentication; cap how often they can trigger a fetch.
const JWKS_MIN_REFRESH_SECS: i64 = 60;

/// JSON Web Key Set.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: Option<String>,
    pub alg: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    email: Option<String>,
}

struct CachedJwks {
    jwks: Jwks,
    fetched_at: chrono::DateTime<Utc>,
}

pub struct FirebaseVerifier {
    project_id: String,
    jwks_url: String,
    client: reqwest::Client,
    cache: DashMap<String, CachedJwks>,
    /// Time of the last fetch attempt. Held across the fetch so concurrent misses queue.
    last_refresh: tokio::sync::Mutex<Option<chrono::DateTime<Utc>>>,
}

impl FirebaseVerifier {
    pub fn new(project_id: impl Into<String>, jwks_url: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            jwks_url: jwks_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            cache: DashMap::new(),
            last_refresh: tokio::sync::Mutex::new(None),
        }
    }

    pub fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    async fn fetch_jwks(&self) -> Result<Jwks, AuthError> {
        tracing::info!(jwks_url = %self.jwks_url, "fetching Firebase JWKS keys");
        let resp = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;
        let jwks: Jwks = resp
            .json()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        self.cache.insert(
            self.jwks_url.clone(),
            CachedJwks {
                jwks: jwks.clone(),
                fetched_at: Utc::now(),
            },
        );
        Ok(jwks)
    }

    fn cached(&self) -> Option<Jwks> {
        let cached = self.cache.get(&self.jwks_url)?;
        let age = Utc::now() - cached.fetched_at;
        (age < chrono::Duration::seconds(JWKS_CACHE_TTL_SECS)).then(|| cached.jwks.clone())
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        let find = |jwks: &Jwks| {
            jwks.keys
                .iter()
                .find(|k| k.kid.as_deref() == Some(kid) && k.kty == "RSA")
                .cloned()
        };

        let jwk = match self.cached().as_ref().and_then(find) {
            Some(k) => k,
            None => {
                let mut last = self.last_refresh.lock().await;
                // Another caller may have refreshed while we waited.
                if let Some(k) = self.cached().as_ref().and_then(find) {
                    k
                } else {
                    let now = Utc::now();
                    if let Some(at) = *last {
                        if now - at < chrono::Duration::seconds(JWKS_MIN_REFRESH_SECS) {
                            tracing::debug!(kid, "unknown key id, JWKS refreshed recently");
                            return Err(AuthError::UnknownKey);
                        }
                    }
                    *last = Some(now);
                    find(&self.fetch_jwks().await?).ok_or(AuthError::UnknownKey)?
                }
            }
        };

        match (jwk.n.as_deref(), jwk.e.as_deref()) {
            (Some(n), Some(e)) => DecodingKey::from_rsa_components(n, e)
                .map_err(|e| AuthError::KeyFetch(e.to_string())),
            _ => Err(AuthError::UnknownKey),
        }
    }

    pub async fn verify(&self, token: &str, kid: &str) -> Result<Principal, AuthError> {
        let key = self.key_for(kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[self.issuer()]);

        let data = decode::<FirebaseClaims>(token, &key, &validation).map_err(AuthError::from_jwt)?;
        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("token has no subject".into()));
        }

        Ok(Principal::External {
            uid: data.claims.sub,
            email: data.claims.email,
        })
    }
}
