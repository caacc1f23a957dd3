//! Creator attribution for permanent records.

use std::sync::Arc;

use uuid::Uuid;

use crate::models::principal::Actor;
use crate::models::record::CreatorKind;
use crate::models::staging::StagingDocument;
use crate::store::{StoreError, UserDirectory};

/// Who a new record is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creator {
    pub user_id: Uuid,
    pub kind: CreatorKind,
    /// The submitting user, when the staging document could be traced back to one.
    pub submitter_user_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct IdentityResolver {
    users: Arc<dyn UserDirectory>,
}

impl IdentityResolver {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }

    /// Look up the system-of-record user behind a submission's external uid.
    pub async fn submitter(&self, doc: &StagingDocument) -> Result<Option<Uuid>, StoreError> {
        let Some(external) = doc.external_user_ref.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        Ok(self.users.find_by_external_id(external).await?.map(|u| u.id))
    }

    /// Fallback chain: submitter, then the acting admin, then any admin.
    /// `Ok(None)` means nobody could be found and the record must not be created.
    pub async fn resolve(
        &self,
        doc: &StagingDocument,
        actor: &Actor,
    ) -> Result<Option<Creator>, StoreError> {
        if let Some(user_id) = self.submitter(doc).await? {
            return Ok(Some(Creator {
                user_id,
                kind: CreatorKind::User,
                submitter_user_id: Some(user_id),
            }));
        }

        if let Some(actor_id) = actor.user_id {
            if self.users.get_user(actor_id).await?.is_some() {
                return Ok(Some(Creator {
                    user_id: actor_id,
                    kind: CreatorKind::Admin,
                    submitter_user_id: None,
                }));
            }
            tracing::warn!(actor_id = %actor_id, "acting admin not found in user directory");
        }

        if let Some(admin) = self.users.find_any_admin().await? {
            tracing::debug!(admin_id = %admin.id, doc_id = %doc.id, "attributing record to fallback admin");
            return Ok(Some(Creator {
                user_id: admin.id,
                kind: CreatorKind::Admin,
                submitter_user_id: None,
            }));
        }

        Ok(None)
    }
}
