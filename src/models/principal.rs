use serde::Serialize;
use uuid::Uuid;

/// The authenticated caller, whichever scheme produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Principal {
    /// Firebase-authenticated end user (or admin signed in through Firebase).
    External { uid: String, email: Option<String> },
    /// Holder of an internally issued admin JWT.
    Internal {
        id: String,
        email: Option<String>,
        role: String,
    },
}

impl Principal {
    /// Stable identifier used for audit fields such as `approvedBy` / `rejectedBy`.
    pub fn subject(&self) -> &str {
        match self {
            Principal::External { uid, .. } => uid,
            Principal::Internal { id, .. } => id,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Principal::External { email, .. } | Principal::Internal { email, .. } => {
                email.as_deref()
            }
        }
    }

    /// Internal tokens carry the role claim directly.
    pub fn has_admin_claim(&self) -> bool {
        match self {
            Principal::Internal { role, .. } => {
                matches!(role.to_lowercase().as_str(), "admin" | "super-admin")
            }
            Principal::External { .. } => false,
        }
    }

    /// System-of-record id carried by the token itself, if any.
    pub fn internal_user_id(&self) -> Option<Uuid> {
        match self {
            Principal::Internal { id, .. } => Uuid::parse_str(id).ok(),
            Principal::External { .. } => None,
        }
    }
}

/// A principal cleared for review operations, with its system-of-record user id when known.
#[derive(Debug, Clone)]
pub struct Actor {
    pub principal: Principal,
    pub user_id: Option<Uuid>,
}

impl Actor {
    pub fn new(principal: Principal, user_id: Option<Uuid>) -> Self {
        Self { principal, user_id }
    }

    pub fn subject(&self) -> &str {
        self.principal.subject()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_admin_claim() {
        let p = Principal::Internal {
            id: Uuid::new_v4().to_string(),
            email: None,
            role: "Super-Admin".into(),
        };
        assert!(p.has_admin_claim());
        assert!(p.internal_user_id().is_some());
    }

    #[test]
    fn test_external_has_no_claim_or_id() {
        let p = Principal::External {
            uid: "fb-uid".into(),
            email: Some("a@x.com".into()),
        };
        assert!(!p.has_admin_claim());
        assert_eq!(p.internal_user_id(), None);
        assert_eq!(p.subject(), "fb-uid");
        assert_eq!(p.email(), Some("a@x.com"));
    }

    #[test]
    fn test_non_uuid_internal_id_has_no_user_id() {
        let p = Principal::Internal {
            id: "cli".into(),
            email: None,
            role: "admin".into(),
        };
        assert_eq!(p.internal_user_id(), None);
    }
}
