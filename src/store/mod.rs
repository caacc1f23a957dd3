//! Persistence seams for the review workflow.
//!
//! Backends: [`postgres::PgStore`] (production) and [`memory::MemoryStore`]
//! (local development and tests). Both implement every trait here, so a single
//! store instance can back all three roles.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::record::{InsuranceRecord, LoanRecord, NewRecord, RecordKind, TicketRecord};
use crate::models::staging::{
    NewSubmission, PendingStats, StagingDocument, StagingStatus, SubmissionKind,
};
use crate::models::user::{NewUser, User};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A record already references this staging document.
    #[error("{kind} record already exists for staging document {staging_doc_id}")]
    Duplicate {
        kind: RecordKind,
        staging_doc_id: String,
    },

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Temporary holding area for unreviewed submissions.
///
/// Every mutating transition is conditional: it only applies while the document
/// is not `approved`, and reports whether it applied.
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn add(&self, submission: NewSubmission) -> Result<StagingDocument, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<StagingDocument>, StoreError>;

    /// Pending documents, newest first.
    async fn list_pending(
        &self,
        kind: Option<SubmissionKind>,
    ) -> Result<Vec<StagingDocument>, StoreError>;

    /// All documents submitted by one external user, newest first.
    async fn list_for_user(&self, external_ref: &str) -> Result<Vec<StagingDocument>, StoreError>;

    async fn pending_stats(&self) -> Result<PendingStats, StoreError>;

    /// Set a non-terminal status. Returns `false` if the document is missing or approved.
    async fn set_status(&self, id: &str, status: StagingStatus) -> Result<bool, StoreError>;

    /// Mark approved and link the permanent record. Returns `false` if already approved.
    async fn mark_migrated(&self, id: &str, record_id: Uuid) -> Result<bool, StoreError>;

    /// Returns `false` if the document is missing or approved.
    async fn mark_rejected(
        &self,
        id: &str,
        reason: &str,
        rejected_by: &str,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// System-of-record repositories for approved submissions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a record. Fails with [`StoreError::Duplicate`] if a record of the
    /// same kind already references the staging document.
    async fn insert(&self, record: NewRecord) -> Result<Uuid, StoreError>;

    async fn find_by_staging_doc(
        &self,
        kind: RecordKind,
        staging_doc_id: &str,
    ) -> Result<Option<Uuid>, StoreError>;

    async fn get_loan(&self, id: Uuid) -> Result<Option<LoanRecord>, StoreError>;

    async fn get_insurance(&self, id: Uuid) -> Result<Option<InsuranceRecord>, StoreError>;

    async fn get_ticket(&self, id: Uuid) -> Result<Option<TicketRecord>, StoreError>;

    async fn count(&self, kind: RecordKind) -> Result<u64, StoreError>;
}

/// Read access to platform users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_by_external_id(&self, external_auth_id: &str)
        -> Result<Option<User>, StoreError>;

    /// Any admin account, oldest first.
    async fn find_any_admin(&self) -> Result<Option<User>, StoreError>;

    /// Operator tooling only; the review workflow never calls this.
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
}
