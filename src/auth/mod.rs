//! Bearer authentication.
//!
//! Two token families are accepted and collapsed into one [`Principal`]:
//! RS256 tokens carrying a `kid` are Firebase ID tokens, HS256 tokens are
//! internally issued operator JWTs.

pub mod firebase;
pub mod jwt;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode_header, errors::ErrorKind, Algorithm};
use thiserror::Error;

use crate::errors::AppError;
use crate::models::principal::{Actor, Principal};
use crate::store::UserDirectory;
use crate::AppState;

use firebase::FirebaseVerifier;
use jwt::InternalJwt;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token provided")]
    MissingToken,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("token signed with an unknown key")]
    UnknownKey,

    #[error("could not load signing keys: {0}")]
    KeyFetch(String),

    #[error("{0} tokens are not accepted by this deployment")]
    SchemeDisabled(&'static str),
}

impl AuthError {
    pub(crate) fn from_jwt(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken(e.to_string()),
        }
    }
}

pub struct Authenticator {
    firebase: Option<FirebaseVerifier>,
    internal: InternalJwt,
}

impl Authenticator {
    pub fn new(firebase: Option<FirebaseVerifier>, internal: InternalJwt) -> Self {
        Self { firebase, internal }
    }

    pub fn internal(&self) -> &InternalJwt {
        &self.internal
    }

    pub async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::Malformed(e.to_string()))?;

        match (header.alg, header.kid.as_deref()) {
            (Algorithm::RS256, Some(kid)) => match &self.firebase {
                Some(verifier) => verifier.verify(token, kid).await,
                None => Err(AuthError::SchemeDisabled("Firebase")),
            },
            (Algorithm::HS256, _) => self.internal.verify(token),
            (alg, _) => Err(AuthError::Malformed(format!("unsupported algorithm {alg:?}"))),
        }
    }
}

/// Pull the bearer token out of the `Authorization` header.
pub fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Middleware: verifies the bearer token and stores the [`Principal`] in request extensions.
/// Returns 401 on a missing or invalid token.
pub async fn require_principal(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = bearer_token(&req).map(str::to_string);
    let principal = match token {
        None => Err(AuthError::MissingToken),
        Some(token) => state.auth.authenticate(&token).await,
    };

    match principal {
        Ok(p) => {
            tracing::debug!(subject = %p.subject(), "authenticated");
            req.extensions_mut().insert(p);
            next.run(req).await
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %req.uri().path(), "authentication failed");
            AppError::Auth(e).into_response()
        }
    }
}

/// Admin gate. Internal tokens must carry an admin role; Firebase principals must map
/// to a user with the admin role. The returned actor carries the admin's user id when known.
pub async fn admin_actor(
    principal: Principal,
    users: &dyn UserDirectory,
) -> Result<Actor, AppError> {
    let uid = match &principal {
        Principal::Internal { .. } => {
            if principal.has_admin_claim() {
                let user_id = principal.internal_user_id();
                return Ok(Actor::new(principal, user_id));
            }
            tracing::warn!(subject = %principal.subject(), "non-admin token on review endpoint");
            return Err(AppError::Forbidden("Admin access required".into()));
        }
        Principal::External { uid, .. } => uid.clone(),
    };

    match users.find_by_external_id(&uid).await? {
        Some(user) if user.is_admin() => Ok(Actor::new(principal, Some(user.id))),
        _ => {
            tracing::warn!(subject = %uid, "non-admin Firebase user on review endpoint");
            Err(AppError::Forbidden("Admin access required".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::{NewUser, UserRole};
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_firebase_disabled_rejects_rs256() {
        let auth = Authenticator::new(None, InternalJwt::new("s"));
        // RS256 header with a kid, signature irrelevant
        let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIiwidHlwIjoiSldUIn0.e30.c2ln";
        assert!(matches!(
            auth.authenticate(token).await,
            Err(AuthError::SchemeDisabled(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let auth = Authenticator::new(None, InternalJwt::new("s"));
        assert!(matches!(
            auth.authenticate("not-a-jwt").await,
            Err(AuthError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_gate() {
        let store = MemoryStore::new();
        let admin = store
            .insert_user(NewUser {
                external_auth_id: "fb-admin".into(),
                name: "Admin".into(),
                email: "admin@loanzaar.in".into(),
                role: UserRole::Admin,
            })
            .await
            .unwrap();
        store
            .insert_user(NewUser {
                external_auth_id: "fb-user".into(),
                name: "User".into(),
                email: "user@loanzaar.in".into(),
                role: UserRole::User,
            })
            .await
            .unwrap();

        let actor = admin_actor(
            Principal::External {
                uid: "fb-admin".into(),
                email: None,
            },
            &store,
        )
        .await
        .unwrap();
        assert_eq!(actor.user_id, Some(admin.id));

        let denied = admin_actor(
            Principal::External {
                uid: "fb-user".into(),
                email: None,
            },
            &store,
        )
        .await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));

        let denied = admin_actor(
            Principal::Internal {
                id: "x".into(),
                email: None,
                role: "user".into(),
            },
            &store,
        )
        .await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));
    }
}
