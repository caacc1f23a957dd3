//! Internally issued HS256 tokens for operators and back-office tools.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::AuthError;
use crate::models::principal::Principal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalClaims {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Absent role means an ordinary user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

impl From<InternalClaims> for Principal {
    fn from(c: InternalClaims) -> Self {
        Principal::Internal {
            id: c.id,
            email: c.email,
            role: c.role.unwrap_or_else(|| "user".to_string()),
        }
    }
}

#[derive(Clone)]
pub struct InternalJwt {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl InternalJwt {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(
        &self,
        id: &str,
        email: Option<&str>,
        role: &str,
        ttl: chrono::Duration,
    ) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = InternalClaims {
            id: id.to_string(),
            email: email.map(str::to_string),
            role: Some(role.to_string()),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let data = decode::<InternalClaims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(AuthError::from_jwt)?;
        if data.claims.id.trim().is_empty() {
            return Err(AuthError::InvalidToken("token has no subject".into()));
        }
        Ok(data.claims.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let jwt = InternalJwt::new("test-secret");
        let token = jwt
            .issue("u-1", Some("ops@loanzaar.in"), "admin", chrono::Duration::hours(1))
            .unwrap();
        let p = jwt.verify(&token).unwrap();
        assert_eq!(p.subject(), "u-1");
        assert!(p.has_admin_claim());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = InternalJwt::new("a")
            .issue("u-1", None, "admin", chrono::Duration::hours(1))
            .unwrap();
        assert!(matches!(
            InternalJwt::new("b").verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_rejected() {
        let jwt = InternalJwt::new("s");
        let token = jwt
            .issue("u-1", None, "admin", chrono::Duration::hours(-2))
            .unwrap();
        assert!(matches!(jwt.verify(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_missing_role_is_plain_user() {
        let now = Utc::now().timestamp();
        let claims = serde_json::json!({ "id": "u-2", "exp": now + 600, "iat": now });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"s"),
        )
        .unwrap();
        let p = InternalJwt::new("s").verify(&token).unwrap();
        assert!(!p.has_admin_claim());
    }
}
