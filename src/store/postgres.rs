use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{RecordStore, StagingStore, StoreError, UserDirectory};
use crate::models::record::{
    format_ticket_number, InsuranceRecord, LoanRecord, NewRecord, RecordKind, TicketRecord,
};
use crate::models::staging::{
    new_staging_id, NewSubmission, PendingStats, StagingDocument, StagingStatus, SubmissionKind,
};
use crate::models::user::{NewUser, User};

const STAGING_COLUMNS: &str = "id, kind, external_user_ref, form_data, status, created_at, updated_at, \
     migrated_at, record_id, rejection_reason, rejected_at, rejected_by";

const USER_COLUMNS: &str = "id, external_auth_id, name, email, role, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Map a unique violation on `staging_doc_id` to [`StoreError::Duplicate`].
fn insert_error(e: sqlx::Error, kind: RecordKind, staging_doc_id: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Duplicate {
                kind,
                staging_doc_id: staging_doc_id.to_string(),
            };
        }
    }
    StoreError::from(e)
}

#[async_trait]
impl StagingStore for PgStore {
    async fn add(&self, submission: NewSubmission) -> Result<StagingDocument, StoreError> {
        let doc = sqlx::query_as::<_, StagingDocument>(&format!(
            "INSERT INTO staging_documents (id, kind, external_user_ref, form_data)
             VALUES ($1, $2, $3, $4)
             RETURNING {STAGING_COLUMNS}"
        ))
        .bind(new_staging_id())
        .bind(submission.kind)
        .bind(&submission.external_user_ref)
        .bind(&submission.form_data)
        .fetch_one(&self.pool)
        .await?;
        Ok(doc)
    }

    async fn get(&self, id: &str) -> Result<Option<StagingDocument>, StoreError> {
        let doc = sqlx::query_as::<_, StagingDocument>(&format!(
            "SELECT {STAGING_COLUMNS} FROM staging_documents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(doc)
    }

    async fn list_pending(
        &self,
        kind: Option<SubmissionKind>,
    ) -> Result<Vec<StagingDocument>, StoreError> {
        let docs = sqlx::query_as::<_, StagingDocument>(&format!(
            "SELECT {STAGING_COLUMNS} FROM staging_documents
             WHERE status = 'pending' AND ($1::varchar IS NULL OR kind = $1)
             ORDER BY created_at DESC"
        ))
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    async fn list_for_user(&self, external_ref: &str) -> Result<Vec<StagingDocument>, StoreError> {
        let docs = sqlx::query_as::<_, StagingDocument>(&format!(
            "SELECT {STAGING_COLUMNS} FROM staging_documents
             WHERE external_user_ref = $1
             ORDER BY created_at DESC"
        ))
        .bind(external_ref)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    async fn pending_stats(&self) -> Result<PendingStats, StoreError> {
        let rows = sqlx::query_as::<_, (SubmissionKind, i64)>(
            "SELECT kind, COUNT(*) FROM staging_documents WHERE status = 'pending' GROUP BY kind",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = PendingStats::default();
        for (kind, n) in rows {
            let n = n.max(0) as u64;
            stats.total += n;
            match kind {
                SubmissionKind::Loan => stats.loans += n,
                SubmissionKind::Insurance => stats.insurances += n,
                SubmissionKind::Ticket => stats.tickets += n,
                SubmissionKind::Chat => stats.chats += n,
            }
        }
        Ok(stats)
    }

    async fn set_status(&self, id: &str, status: StagingStatus) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE staging_documents SET status = $2, updated_at = NOW()
             WHERE id = $1 AND status <> 'approved'",
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_migrated(&self, id: &str, record_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE staging_documents
             SET status = 'approved', migrated_at = NOW(), record_id = $2, updated_at = NOW()
             WHERE id = $1 AND status <> 'approved'",
        )
        .bind(id)
        .bind(record_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_rejected(
        &self,
        id: &str,
        reason: &str,
        rejected_by: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE staging_documents
             SET status = 'rejected', rejection_reason = $2, rejected_at = NOW(),
                 rejected_by = $3, updated_at = NOW()
             WHERE id = $1 AND status <> 'approved'",
        )
        .bind(id)
        .bind(reason)
        .bind(rejected_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM staging_documents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn insert(&self, record: NewRecord) -> Result<Uuid, StoreError> {
        let kind = record.kind();
        let staging_doc_id = record.staging_doc_id().to_string();

        let result = match record {
            NewRecord::Loan(r) => {
                sqlx::query(
                    r#"INSERT INTO loans (id, staging_doc_id, user_id, full_name, email, phone, city_state,
                                          loan_type, loan_amount, tenure, consent, details, status, admin_notes,
                                          approved_at, approved_by, created_by, created_by_id, created_at)
                       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"#,
                )
                .bind(r.id)
                .bind(&r.staging_doc_id)
                .bind(r.user_id)
                .bind(&r.full_name)
                .bind(&r.email)
                .bind(&r.phone)
                .bind(&r.city_state)
                .bind(&r.loan_type)
                .bind(r.loan_amount)
                .bind(&r.tenure)
                .bind(r.consent)
                .bind(&r.details)
                .bind(r.status)
                .bind(&r.admin_notes)
                .bind(r.approved_at)
                .bind(&r.approved_by)
                .bind(r.created_by)
                .bind(r.created_by_id)
                .bind(r.created_at)
                .execute(&self.pool)
                .await
                .map(|_| r.id)
            }
            NewRecord::Insurance(r) => {
                sqlx::query(
                    r#"INSERT INTO insurances (id, staging_doc_id, user_id, full_name, email, phone, age,
                                               insurance_type, coverage_amount, details, status, admin_notes,
                                               approved_at, approved_by, created_by, created_by_id, created_at)
                       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"#,
                )
                .bind(r.id)
                .bind(&r.staging_doc_id)
                .bind(r.user_id)
                .bind(&r.full_name)
                .bind(&r.email)
                .bind(&r.phone)
                .bind(r.age)
                .bind(&r.insurance_type)
                .bind(&r.coverage_amount)
                .bind(&r.details)
                .bind(r.status)
                .bind(&r.admin_notes)
                .bind(r.approved_at)
                .bind(&r.approved_by)
                .bind(r.created_by)
                .bind(r.created_by_id)
                .bind(r.created_at)
                .execute(&self.pool)
                .await
                .map(|_| r.id)
            }
            NewRecord::Ticket(t) => {
                let seq = sqlx::query_scalar::<_, i64>("SELECT nextval('ticket_number_seq')")
                    .fetch_one(&self.pool)
                    .await?;
                let ticket = t.into_record(format_ticket_number(seq.max(0) as u64));
                sqlx::query(
                    r#"INSERT INTO tickets (id, staging_doc_id, ticket_number, user_id, external_user_ref, loan_id,
                                            subject, description, status, priority, admin_notes, created_at)
                       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
                )
                .bind(ticket.id)
                .bind(&ticket.staging_doc_id)
                .bind(&ticket.ticket_number)
                .bind(ticket.user_id)
                .bind(&ticket.external_user_ref)
                .bind(ticket.loan_id)
                .bind(&ticket.subject)
                .bind(&ticket.description)
                .bind(ticket.status)
                .bind(ticket.priority)
                .bind(&ticket.admin_notes)
                .bind(ticket.created_at)
                .execute(&self.pool)
                .await
                .map(|_| ticket.id)
            }
        };

        result.map_err(|e| insert_error(e, kind, &staging_doc_id))
    }

    async fn find_by_staging_doc(
        &self,
        kind: RecordKind,
        staging_doc_id: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let sql = match kind {
            RecordKind::Loan => "SELECT id FROM loans WHERE staging_doc_id = $1",
            RecordKind::Insurance => "SELECT id FROM insurances WHERE staging_doc_id = $1",
            RecordKind::Ticket => "SELECT id FROM tickets WHERE staging_doc_id = $1",
        };
        let id = sqlx::query_scalar::<_, Uuid>(sql)
            .bind(staging_doc_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn get_loan(&self, id: Uuid) -> Result<Option<LoanRecord>, StoreError> {
        let row = sqlx::query_as::<_, LoanRecord>(
            "SELECT id, staging_doc_id, user_id, full_name, email, phone, city_state, loan_type, loan_amount,
                    tenure, consent, details, status, admin_notes, approved_at, approved_by, created_by,
                    created_by_id, created_at
             FROM loans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_insurance(&self, id: Uuid) -> Result<Option<InsuranceRecord>, StoreError> {
        let row = sqlx::query_as::<_, InsuranceRecord>(
            "SELECT id, staging_doc_id, user_id, full_name, email, phone, age, insurance_type,
                    coverage_amount, details, status, admin_notes, approved_at, approved_by, created_by,
                    created_by_id, created_at
             FROM insurances WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<TicketRecord>, StoreError> {
        let row = sqlx::query_as::<_, TicketRecord>(
            "SELECT id, staging_doc_id, ticket_number, user_id, external_user_ref, loan_id, subject,
                    description, status, priority, admin_notes, created_at
             FROM tickets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn count(&self, kind: RecordKind) -> Result<u64, StoreError> {
        let sql = match kind {
            RecordKind::Loan => "SELECT COUNT(*) FROM loans",
            RecordKind::Insurance => "SELECT COUNT(*) FROM insurances",
            RecordKind::Ticket => "SELECT COUNT(*) FROM tickets",
        };
        let n = sqlx::query_scalar::<_, i64>(sql).fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_external_id(
        &self,
        external_auth_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE external_auth_id = $1"
        ))
        .bind(external_auth_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_any_admin(&self) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = 'admin' ORDER BY created_at ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let created = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (external_auth_id, name, email, role)
             VALUES ($1, $2, $3, $4)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.external_auth_id)
        .bind(&user.name)
        .bind(user.email.to_lowercase())
        .bind(user.role)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}
