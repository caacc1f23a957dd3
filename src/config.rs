use serde::Deserialize;

use crate::auth::firebase::GOOGLE_SECURETOKEN_JWKS;
use crate::notification::fcm::DEFAULT_FCM_BASE_URL;
use crate::workflow::mapping::FieldDefaults;

const PLACEHOLDER_JWT_SECRET: &str = "CHANGE_ME_LOANZAAR_JWT_SECRET";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub storage: StorageBackend,
    pub jwt_secret: String,
    /// Firebase project id; enables Firebase ID token verification.
    pub firebase_project_id: Option<String>,
    /// Raw service-account JSON; enables FCM push.
    pub firebase_service_account: Option<String>,
    pub firebase_jwks_url: String,
    pub fcm_base_url: String,
    /// Comma-separated list of webhook URLs notified on review outcomes.
    pub webhook_urls: Vec<String>,
    pub webhook_secret: Option<String>,
    /// Set via LOANZAAR_DEFAULT_CONSENT: `true` (default), `false`, or `none`.
    pub default_consent: Option<bool>,
    /// Allowed CORS origins (FRONTEND_URL, comma-separated).
    pub frontend_origins: Vec<String>,
}

impl Config {
    pub fn field_defaults(&self) -> FieldDefaults {
        FieldDefaults {
            consent: self.default_consent,
        }
    }
}

fn list(var: &str) -> Vec<String> {
    std::env::var(var)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

pub fn parse_consent_default(raw: &str) -> anyhow::Result<Option<bool>> {
    match raw.trim().to_lowercase().as_str() {
        "" | "true" => Ok(Some(true)),
        "false" => Ok(Some(false)),
        "none" => Ok(None),
        other => anyhow::bail!(
            "LOANZAAR_DEFAULT_CONSENT must be one of true, false, none (got `{}`)",
            other
        ),
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let jwt_secret =
        std::env::var("JWT_SECRET").unwrap_or_else(|_| PLACEHOLDER_JWT_SECRET.into());

    if jwt_secret == PLACEHOLDER_JWT_SECRET {
        let env_mode = std::env::var("LOANZAAR_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "JWT_SECRET is still the insecure placeholder. \
                 Set a strong secret before running in production."
            );
        }
        eprintln!("⚠️  JWT_SECRET is not set — using insecure placeholder. Set a strong secret for production.");
    }

    let storage = match std::env::var("LOANZAAR_STORAGE")
        .unwrap_or_else(|_| "postgres".into())
        .to_lowercase()
        .as_str()
    {
        "memory" => StorageBackend::Memory,
        "postgres" => StorageBackend::Postgres,
        other => anyhow::bail!("LOANZAAR_STORAGE must be `postgres` or `memory` (got `{}`)", other),
    };

    Ok(Config {
        port: std::env::var("LOANZAAR_PORT")
            .unwrap_or_else(|_| "5000".into())
            .parse()
            .unwrap_or(5000),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/loanzaar".into()),
        storage,
        jwt_secret,
        firebase_project_id: non_empty("FIREBASE_PROJECT_ID"),
        firebase_service_account: non_empty("FIREBASE_SERVICE_ACCOUNT"),
        firebase_jwks_url: non_empty("FIREBASE_JWKS_URL")
            .unwrap_or_else(|| GOOGLE_SECURETOKEN_JWKS.into()),
        fcm_base_url: non_empty("FCM_BASE_URL").unwrap_or_else(|| DEFAULT_FCM_BASE_URL.into()),
        webhook_urls: list("LOANZAAR_WEBHOOK_URLS"),
        webhook_secret: non_empty("LOANZAAR_WEBHOOK_SECRET"),
        default_consent: parse_consent_default(
            &std::env::var("LOANZAAR_DEFAULT_CONSENT").unwrap_or_default(),
        )?,
        frontend_origins: list("FRONTEND_URL"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consent_default_values() {
        assert_eq!(parse_consent_default("").unwrap(), Some(true));
        assert_eq!(parse_consent_default("FALSE").unwrap(), Some(false));
        assert_eq!(parse_consent_default("none").unwrap(), None);
        assert!(parse_consent_default("maybe").is_err());
    }
}
