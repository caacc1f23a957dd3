//! In-process store backed by `DashMap`.
//!
//! Conditional transitions run under the shard lock held by `get_mut`, and record
//! uniqueness is enforced through the `by_staging` entry API, so concurrent
//! approvals behave the same as against Postgres.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{RecordStore, StagingStore, StoreError, UserDirectory};
use crate::models::record::{
    format_ticket_number, InsuranceRecord, LoanRecord, NewRecord, RecordKind, TicketRecord,
};
use crate::models::staging::{
    new_staging_id, NewSubmission, PendingStats, StagingDocument, StagingStatus, SubmissionKind,
};
use crate::models::user::{NewUser, User, UserRole};

#[derive(Clone, Default)]
pub struct MemoryStore {
    staging: Arc<DashMap<String, StagingDocument>>,
    loans: Arc<DashMap<Uuid, LoanRecord>>,
    insurances: Arc<DashMap<Uuid, InsuranceRecord>>,
    tickets: Arc<DashMap<Uuid, TicketRecord>>,
    by_staging: Arc<DashMap<(RecordKind, String), Uuid>>,
    users: Arc<DashMap<Uuid, User>>,
    ticket_seq: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed staging document (fixtures, imports).
    pub fn put_document(&self, doc: StagingDocument) {
        self.staging.insert(doc.id.clone(), doc);
    }

    pub fn put_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    fn sorted_newest_first(mut docs: Vec<StagingDocument>) -> Vec<StagingDocument> {
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        docs
    }
}

#[async_trait]
impl StagingStore for MemoryStore {
    async fn add(&self, submission: NewSubmission) -> Result<StagingDocument, StoreError> {
        let now = Utc::now();
        let doc = StagingDocument {
            id: new_staging_id(),
            kind: submission.kind,
            external_user_ref: submission.external_user_ref,
            form_data: submission.form_data,
            status: StagingStatus::Pending,
            created_at: now,
            updated_at: now,
            migrated_at: None,
            record_id: None,
            rejection_reason: None,
            rejected_at: None,
            rejected_by: None,
        };
        self.staging.insert(doc.id.clone(), doc.clone());
        Ok(doc)
    }

    async fn get(&self, id: &str) -> Result<Option<StagingDocument>, StoreError> {
        Ok(self.staging.get(id).map(|d| d.clone()))
    }

    async fn list_pending(
        &self,
        kind: Option<SubmissionKind>,
    ) -> Result<Vec<StagingDocument>, StoreError> {
        let docs = self
            .staging
            .iter()
            .filter(|d| d.status == StagingStatus::Pending)
            .filter(|d| kind.map_or(true, |k| d.kind == k))
            .map(|d| d.clone())
            .collect();
        Ok(Self::sorted_newest_first(docs))
    }

    async fn list_for_user(&self, external_ref: &str) -> Result<Vec<StagingDocument>, StoreError> {
        let docs = self
            .staging
            .iter()
            .filter(|d| d.external_user_ref.as_deref() == Some(external_ref))
            .map(|d| d.clone())
            .collect();
        Ok(Self::sorted_newest_first(docs))
    }

    async fn pending_stats(&self) -> Result<PendingStats, StoreError> {
        let mut stats = PendingStats::default();
        for doc in self.staging.iter() {
            if doc.status == StagingStatus::Pending {
                stats.bump(doc.kind);
            }
        }
        Ok(stats)
    }

    async fn set_status(&self, id: &str, status: StagingStatus) -> Result<bool, StoreError> {
        match self.staging.get_mut(id) {
            Some(mut doc) if doc.status != StagingStatus::Approved => {
                doc.status = status;
                doc.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_migrated(&self, id: &str, record_id: Uuid) -> Result<bool, StoreError> {
        match self.staging.get_mut(id) {
            Some(mut doc) if doc.status != StagingStatus::Approved => {
                let now = Utc::now();
                doc.status = StagingStatus::Approved;
                doc.migrated_at = Some(now);
                doc.record_id = Some(record_id);
                doc.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_rejected(
        &self,
        id: &str,
        reason: &str,
        rejected_by: &str,
    ) -> Result<bool, StoreError> {
        match self.staging.get_mut(id) {
            Some(mut doc) if doc.status != StagingStatus::Approved => {
                let now = Utc::now();
                doc.status = StagingStatus::Rejected;
                doc.rejection_reason = Some(reason.to_string());
                doc.rejected_at = Some(now);
                doc.rejected_by = Some(rejected_by.to_string());
                doc.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.staging.remove(id).is_some())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, record: NewRecord) -> Result<Uuid, StoreError> {
        let kind = record.kind();
        let key = (kind, record.staging_doc_id().to_string());
        let id = record.id();

        // The entry guard is held until the record is stored.
        match self.by_staging.entry(key) {
            Entry::Occupied(e) => Err(StoreError::Duplicate {
                kind,
                staging_doc_id: e.key().1.clone(),
            }),
            Entry::Vacant(slot) => {
                match record {
                    NewRecord::Loan(loan) => {
                        self.loans.insert(id, loan);
                    }
                    NewRecord::Insurance(ins) => {
                        self.insurances.insert(id, ins);
                    }
                    NewRecord::Ticket(ticket) => {
                        let seq = self.ticket_seq.fetch_add(1, Ordering::SeqCst) + 1;
                        self.tickets
                            .insert(id, ticket.into_record(format_ticket_number(seq)));
                    }
                }
                slot.insert(id);
                Ok(id)
            }
        }
    }

    async fn find_by_staging_doc(
        &self,
        kind: RecordKind,
        staging_doc_id: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        Ok(self
            .by_staging
            .get(&(kind, staging_doc_id.to_string()))
            .map(|id| *id))
    }

    async fn get_loan(&self, id: Uuid) -> Result<Option<LoanRecord>, StoreError> {
        Ok(self.loans.get(&id).map(|r| r.clone()))
    }

    async fn get_insurance(&self, id: Uuid) -> Result<Option<InsuranceRecord>, StoreError> {
        Ok(self.insurances.get(&id).map(|r| r.clone()))
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<TicketRecord>, StoreError> {
        Ok(self.tickets.get(&id).map(|r| r.clone()))
    }

    async fn count(&self, kind: RecordKind) -> Result<u64, StoreError> {
        let n = match kind {
            RecordKind::Loan => self.loans.len(),
            RecordKind::Insurance => self.insurances.len(),
            RecordKind::Ticket => self.tickets.len(),
        };
        Ok(n as u64)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn find_by_external_id(
        &self,
        external_auth_id: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .iter()
            .find(|u| u.external_auth_id == external_auth_id)
            .map(|u| u.clone()))
    }

    async fn find_any_admin(&self) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .iter()
            .filter(|u| u.role == UserRole::Admin)
            .min_by_key(|u| u.created_at)
            .map(|u| u.clone()))
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        if self
            .users
            .iter()
            .any(|u| u.external_auth_id == user.external_auth_id || u.email == user.email)
        {
            return Err(StoreError::Database(format!(
                "user with external id {} or email {} already exists",
                user.external_auth_id, user.email
            )));
        }
        let created = User {
            id: Uuid::new_v4(),
            external_auth_id: user.external_auth_id,
            name: user.name,
            email: user.email.to_lowercase(),
            role: user.role,
            created_at: Utc::now(),
        };
        self.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }
}
