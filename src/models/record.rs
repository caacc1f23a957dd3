//! System-of-record entities created when a staged submission is approved.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::staging::SubmissionKind;

/// The approvable subset of [`SubmissionKind`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Loan,
    Insurance,
    Ticket,
}

impl RecordKind {
    pub fn submission_kind(&self) -> SubmissionKind {
        match self {
            RecordKind::Loan => SubmissionKind::Loan,
            RecordKind::Insurance => SubmissionKind::Insurance,
            RecordKind::Ticket => SubmissionKind::Ticket,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.submission_kind().as_str()
    }

    /// Human label used in messages ("Document is not a loan").
    pub fn article_label(&self) -> &'static str {
        match self {
            RecordKind::Loan => "a loan",
            RecordKind::Insurance => "an insurance",
            RecordKind::Ticket => "a ticket",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[sqlx(type_name = "varchar")]
pub enum RecordStatus {
    Pending,
    Processing,
    Approved,
    Rejected,
}

/// Who a record is attributed to.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum CreatorKind {
    Admin,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LoanRecord {
    pub id: Uuid,
    pub staging_doc_id: String,
    pub user_id: Option<Uuid>,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub city_state: Option<String>,
    pub loan_type: String,
    pub loan_amount: Decimal,
    pub tenure: Option<String>,
    pub consent: bool,
    /// Loan-type specific form fields (business, education, gold, ...).
    pub details: serde_json::Value,
    pub status: RecordStatus,
    pub admin_notes: String,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub created_by: CreatorKind,
    pub created_by_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InsuranceRecord {
    pub id: Uuid,
    pub staging_doc_id: String,
    pub user_id: Option<Uuid>,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub age: Option<i32>,
    pub insurance_type: String,
    pub coverage_amount: Option<String>,
    pub details: serde_json::Value,
    pub status: RecordStatus,
    pub admin_notes: String,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub created_by: CreatorKind,
    pub created_by_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(TicketPriority::Low),
            "medium" => Some(TicketPriority::Medium),
            "high" => Some(TicketPriority::High),
            "urgent" => Some(TicketPriority::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketRecord {
    pub id: Uuid,
    pub staging_doc_id: String,
    pub ticket_number: String,
    pub user_id: Option<Uuid>,
    pub external_user_ref: Option<String>,
    pub loan_id: Option<Uuid>,
    pub subject: String,
    pub description: Option<String>,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub admin_notes: String,
    pub created_at: DateTime<Utc>,
}

/// A ticket before the store assigns its number.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub id: Uuid,
    pub staging_doc_id: String,
    pub user_id: Option<Uuid>,
    pub external_user_ref: Option<String>,
    pub loan_id: Option<Uuid>,
    pub subject: String,
    pub description: Option<String>,
    pub priority: TicketPriority,
    pub admin_notes: String,
    pub created_at: DateTime<Utc>,
}

impl NewTicket {
    pub fn into_record(self, ticket_number: String) -> TicketRecord {
        TicketRecord {
            id: self.id,
            staging_doc_id: self.staging_doc_id,
            ticket_number,
            user_id: self.user_id,
            external_user_ref: self.external_user_ref,
            loan_id: self.loan_id,
            subject: self.subject,
            description: self.description,
            status: TicketStatus::Open,
            priority: self.priority,
            admin_notes: self.admin_notes,
            created_at: self.created_at,
        }
    }
}

pub fn format_ticket_number(seq: u64) -> String {
    format!("TKT-{:06}", seq)
}

/// A record ready to be persisted.
#[derive(Debug, Clone)]
pub enum NewRecord {
    Loan(LoanRecord),
    Insurance(InsuranceRecord),
    Ticket(NewTicket),
}

impl NewRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            NewRecord::Loan(_) => RecordKind::Loan,
            NewRecord::Insurance(_) => RecordKind::Insurance,
            NewRecord::Ticket(_) => RecordKind::Ticket,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            NewRecord::Loan(r) => r.id,
            NewRecord::Insurance(r) => r.id,
            NewRecord::Ticket(r) => r.id,
        }
    }

    pub fn staging_doc_id(&self) -> &str {
        match self {
            NewRecord::Loan(r) => &r.staging_doc_id,
            NewRecord::Insurance(r) => &r.staging_doc_id,
            NewRecord::Ticket(r) => &r.staging_doc_id,
        }
    }
}
