//! The review state machine over staged submissions.
//!
//! ```text
//! pending ──► processing ──► approved (final)
//!    │            │
//!    └────────────┴──► rejected ──► approved
//! ```
//!
//! Approval migrates the submission into the system of record. Every staging
//! transition is conditional on the document not being approved yet, and each
//! record carries a unique back-reference to its staging document, so a document
//! yields at most one record even under concurrent approvals.

pub mod mapping;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::WorkflowError;
use crate::identity::IdentityResolver;
use crate::metrics;
use crate::models::principal::{Actor, Principal};
use crate::models::record::{NewRecord, RecordKind};
use crate::models::staging::{
    NewSubmission, PendingStats, StagingDocument, StagingStatus, SubmissionKind,
};
use crate::notification::webhook::WorkflowEvent;
use crate::notification::{Notice, Notifier, Target};
use crate::store::{RecordStore, StagingStore, StoreError};

use mapping::{Approval, FieldDefaults};

pub const DEFAULT_REJECTION_REASON: &str = "Not approved";
const UNKNOWN_ADMIN: &str = "unknown-admin";

#[derive(Debug, Clone, Default)]
pub struct ApproveOptions {
    pub admin_notes: Option<String>,
    /// Tickets only.
    pub priority: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub kind: RecordKind,
    pub record_id: Uuid,
    pub doc_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionOutcome {
    pub doc_id: String,
    pub reason: String,
}

/// Pending documents grouped by kind, with counts.
#[derive(Debug, Clone, Serialize)]
pub struct PendingOverview {
    pub stats: PendingStats,
    pub loans: Vec<StagingDocument>,
    pub insurances: Vec<StagingDocument>,
    pub tickets: Vec<StagingDocument>,
}

pub struct ApprovalWorkflow {
    staging: Arc<dyn StagingStore>,
    records: Arc<dyn RecordStore>,
    identity: IdentityResolver,
    notifier: Notifier,
    defaults: FieldDefaults,
}

impl ApprovalWorkflow {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        records: Arc<dyn RecordStore>,
        identity: IdentityResolver,
        notifier: Notifier,
        defaults: FieldDefaults,
    ) -> Self {
        Self {
            staging,
            records,
            identity,
            notifier,
            defaults,
        }
    }

    async fn fetch(&self, doc_id: &str) -> Result<StagingDocument, WorkflowError> {
        self.staging
            .get(doc_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(doc_id.to_string()))
    }

    fn check_kind(doc: &StagingDocument, kind: RecordKind) -> Result<(), WorkflowError> {
        if doc.kind != kind.submission_kind() {
            return Err(WorkflowError::TypeMismatch {
                expected: kind.article_label(),
            });
        }
        Ok(())
    }

    /// Point a staging document at the record that already exists for it.
    /// Heals documents left `pending` by a crash between record insert and staging update.
    async fn repair_link(&self, kind: RecordKind, doc_id: &str) -> Result<(), WorkflowError> {
        if let Some(existing) = self.records.find_by_staging_doc(kind, doc_id).await? {
            if self.staging.mark_migrated(doc_id, existing).await? {
                tracing::warn!(doc_id, record_id = %existing, kind = %kind, "re-linked staging document to existing record");
            }
        }
        Ok(())
    }

    pub async fn approve(
        &self,
        kind: RecordKind,
        doc_id: &str,
        actor: &Actor,
        opts: ApproveOptions,
    ) -> Result<ApprovalOutcome, WorkflowError> {
        let result = self.approve_inner(kind, doc_id, actor, opts).await;
        let outcome = result.as_ref().map_or_else(|e| e.code(), |_| "ok");
        metrics::record_transition(kind.as_str(), "approve", outcome);
        result
    }

    async fn approve_inner(
        &self,
        kind: RecordKind,
        doc_id: &str,
        actor: &Actor,
        opts: ApproveOptions,
    ) -> Result<ApprovalOutcome, WorkflowError> {
        let doc = self.fetch(doc_id).await?;
        Self::check_kind(&doc, kind)?;
        if doc.status == StagingStatus::Approved {
            return Err(WorkflowError::AlreadyApproved(kind.as_str()));
        }
        if self.records.find_by_staging_doc(kind, &doc.id).await?.is_some() {
            self.repair_link(kind, &doc.id).await?;
            return Err(WorkflowError::AlreadyApproved(kind.as_str()));
        }

        let admin_notes = opts.admin_notes.unwrap_or_default();
        let approved_by = match actor.subject() {
            "" => UNKNOWN_ADMIN,
            s => s,
        };

        let (record, notice) = match kind {
            RecordKind::Loan | RecordKind::Insurance => {
                let creator = self
                    .identity
                    .resolve(&doc, actor)
                    .await?
                    .ok_or(WorkflowError::NoCreatorResolvable(kind.as_str()))?;
                let approval = Approval {
                    creator: &creator,
                    approved_by,
                    admin_notes: &admin_notes,
                    now: Utc::now(),
                };
                let invalid = |report| WorkflowError::ValidationFailed {
                    kind: kind.as_str(),
                    report,
                };

                if kind == RecordKind::Loan {
                    let loan = mapping::build_loan(&doc, &approval, self.defaults).map_err(invalid)?;
                    let notice = Notice::loan_approved(
                        &loan.loan_amount.normalize().to_string(),
                        loan.id,
                        &doc.id,
                    );
                    (NewRecord::Loan(loan), notice)
                } else {
                    let insurance = mapping::build_insurance(&doc, &approval).map_err(invalid)?;
                    let notice = Notice::insurance_approved(
                        Some(insurance.insurance_type.as_str()),
                        insurance.id,
                        &doc.id,
                    );
                    (NewRecord::Insurance(insurance), notice)
                }
            }
            RecordKind::Ticket => {
                let submitter = self.identity.submitter(&doc).await?;
                let ticket = mapping::build_ticket(
                    &doc,
                    submitter,
                    &admin_notes,
                    opts.priority.as_deref(),
                )
                .map_err(|report| WorkflowError::ValidationFailed {
                    kind: "ticket",
                    report,
                })?;
                let notice = Notice::ticket_created(Some(ticket.subject.as_str()), ticket.id, &doc.id);
                (NewRecord::Ticket(ticket), notice)
            }
        };

        let record_id = match self.records.insert(record).await {
            Ok(id) => id,
            Err(StoreError::Duplicate { .. }) => {
                tracing::info!(doc_id = %doc.id, kind = %kind, "lost approval race");
                self.repair_link(kind, &doc.id).await?;
                return Err(WorkflowError::AlreadyApproved(kind.as_str()));
            }
            Err(e) => return Err(e.into()),
        };

        if !self.staging.mark_migrated(&doc.id, record_id).await? {
            tracing::warn!(doc_id = %doc.id, record_id = %record_id, "staging document was already marked approved");
        }

        tracing::info!(
            doc_id = %doc.id,
            kind = %kind,
            record_id = %record_id,
            approved_by,
            "submission approved and migrated"
        );

        self.notifier
            .push_to_submitter(doc.external_user_ref.as_deref(), notice);
        self.notifier
            .emit(WorkflowEvent::approved(&doc, record_id, approved_by));

        Ok(ApprovalOutcome {
            kind,
            record_id,
            doc_id: doc.id,
        })
    }

    pub async fn reject(
        &self,
        kind: RecordKind,
        doc_id: &str,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<RejectionOutcome, WorkflowError> {
        let result = self.reject_inner(kind, doc_id, actor, reason).await;
        let outcome = result.as_ref().map_or_else(|e| e.code(), |_| "ok");
        metrics::record_transition(kind.as_str(), "reject", outcome);
        result
    }

    async fn reject_inner(
        &self,
        kind: RecordKind,
        doc_id: &str,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<RejectionOutcome, WorkflowError> {
        let doc = self.fetch(doc_id).await?;
        Self::check_kind(&doc, kind)?;
        if doc.status == StagingStatus::Approved {
            return Err(WorkflowError::AlreadyApproved(kind.as_str()));
        }

        let given = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        let stored = given
            .clone()
            .unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string());
        let rejected_by = match actor.subject() {
            "" => UNKNOWN_ADMIN,
            s => s,
        };

        // A record without the staging link means an approval is mid-flight or crashed
        // after its insert. Either way the document is approved.
        if self.records.find_by_staging_doc(kind, &doc.id).await?.is_some() {
            self.repair_link(kind, &doc.id).await?;
            return Err(WorkflowError::AlreadyApproved(kind.as_str()));
        }

        if !self
            .staging
            .mark_rejected(&doc.id, &stored, rejected_by)
            .await?
        {
            // Changed underneath us: deleted or approved concurrently.
            return match self.staging.get(&doc.id).await? {
                None => Err(WorkflowError::NotFound(doc.id)),
                Some(_) => Err(WorkflowError::AlreadyApproved(kind.as_str())),
            };
        }

        // An approval that inserted its record between the check above and
        // mark_rejected will flip the document to approved; stay silent.
        if self.records.find_by_staging_doc(kind, &doc.id).await?.is_some() {
            self.repair_link(kind, &doc.id).await?;
            return Err(WorkflowError::AlreadyApproved(kind.as_str()));
        }

        tracing::info!(doc_id = %doc.id, kind = %kind, rejected_by, reason = %stored, "submission rejected");

        self.notifier.push_to_submitter(
            doc.external_user_ref.as_deref(),
            Notice::rejected(doc.kind, given.as_deref(), &doc.id),
        );
        self.notifier
            .emit(WorkflowEvent::rejected(&doc, &stored, rejected_by));

        Ok(RejectionOutcome {
            doc_id: doc.id,
            reason: stored,
        })
    }

    /// Staging-only status change. `approved` is reachable only through [`Self::approve`].
    pub async fn update_status(
        &self,
        doc_id: &str,
        status: &str,
    ) -> Result<StagingStatus, WorkflowError> {
        let result = self.update_status_inner(doc_id, status).await;
        let outcome = result.as_ref().map_or_else(|e| e.code(), |_| "ok");
        metrics::record_transition("any", "update_status", outcome);
        result
    }

    async fn update_status_inner(
        &self,
        doc_id: &str,
        status: &str,
    ) -> Result<StagingStatus, WorkflowError> {
        let target = StagingStatus::parse(status).ok_or_else(|| {
            WorkflowError::InvalidTransition(format!("unknown status `{}`", status.trim()))
        })?;
        if target == StagingStatus::Approved {
            return Err(WorkflowError::InvalidTransition(
                "documents are approved through the approve endpoints".into(),
            ));
        }

        let doc = self.fetch(doc_id).await?;
        if doc.status == StagingStatus::Approved {
            return Err(WorkflowError::InvalidTransition(format!(
                "document {} is already approved",
                doc.id
            )));
        }

        if !self.staging.set_status(&doc.id, target).await? {
            return match self.staging.get(&doc.id).await? {
                None => Err(WorkflowError::NotFound(doc.id)),
                Some(_) => Err(WorkflowError::InvalidTransition(format!(
                    "document {} is already approved",
                    doc.id
                ))),
            };
        }

        tracing::info!(doc_id = %doc.id, from = %doc.status, to = %target, "staging status updated");
        Ok(target)
    }

    pub async fn list_pending(
        &self,
        kind: Option<SubmissionKind>,
    ) -> Result<Vec<StagingDocument>, WorkflowError> {
        Ok(self.staging.list_pending(kind).await?)
    }

    pub async fn stats(&self) -> Result<PendingStats, WorkflowError> {
        Ok(self.staging.pending_stats().await?)
    }

    pub async fn pending_overview(&self) -> Result<PendingOverview, WorkflowError> {
        let stats = self.staging.pending_stats().await?;
        let mut all = self.staging.list_pending(None).await?;

        // Partition preserves the newest-first order of the store.
        let mut take = |kind: SubmissionKind| {
            let (matching, rest): (Vec<_>, Vec<_>) = all.drain(..).partition(|d| d.kind == kind);
            all = rest;
            matching
        };
        let loans = take(SubmissionKind::Loan);
        let insurances = take(SubmissionKind::Insurance);
        let tickets = take(SubmissionKind::Ticket);

        Ok(PendingOverview {
            stats,
            loans,
            insurances,
            tickets,
        })
    }

    /// Stage a new submission for review and alert the admin topic.
    pub async fn submit(
        &self,
        kind: SubmissionKind,
        form_data: serde_json::Value,
        principal: &Principal,
    ) -> Result<StagingDocument, WorkflowError> {
        let doc = self
            .staging
            .add(NewSubmission {
                kind,
                external_user_ref: Some(principal.subject().to_string()),
                form_data,
            })
            .await?;

        tracing::info!(doc_id = %doc.id, kind = %kind, "submission staged");

        self.notifier
            .push(Target::admins(), Notice::new_submission(kind, &doc.id));
        self.notifier.emit(WorkflowEvent::created(&doc));
        Ok(doc)
    }

    pub async fn list_for_user(
        &self,
        principal: &Principal,
    ) -> Result<Vec<StagingDocument>, WorkflowError> {
        Ok(self.staging.list_for_user(principal.subject()).await?)
    }

    pub async fn get(&self, doc_id: &str) -> Result<StagingDocument, WorkflowError> {
        self.fetch(doc_id).await
    }

    /// Housekeeping delete. Permanent records are untouched.
    pub async fn delete(&self, doc_id: &str) -> Result<(), WorkflowError> {
        if !self.staging.delete(doc_id).await? {
            return Err(WorkflowError::NotFound(doc_id.to_string()));
        }
        tracing::info!(doc_id, "staging document deleted");
        Ok(())
    }
}
