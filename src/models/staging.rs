use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a staged submission. Matches the `type` field clients send.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum SubmissionKind {
    Loan,
    Insurance,
    Ticket,
    Chat,
}

impl SubmissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionKind::Loan => "loan",
            SubmissionKind::Insurance => "insurance",
            SubmissionKind::Ticket => "ticket",
            SubmissionKind::Chat => "chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "loan" => Some(SubmissionKind::Loan),
            "insurance" => Some(SubmissionKind::Insurance),
            "ticket" => Some(SubmissionKind::Ticket),
            "chat" => Some(SubmissionKind::Chat),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum StagingStatus {
    Pending,
    Processing,
    Approved,
    Rejected,
}

impl StagingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingStatus::Pending => "pending",
            StagingStatus::Processing => "processing",
            StagingStatus::Approved => "approved",
            StagingStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(StagingStatus::Pending),
            "processing" => Some(StagingStatus::Processing),
            "approved" => Some(StagingStatus::Approved),
            "rejected" => Some(StagingStatus::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for StagingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A submission parked in the staging store until an admin reviews it.
///
/// Serialized with the field names the admin dashboard already consumes
/// (`type`, `userId`, `formData`, `mongoId`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StagingDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SubmissionKind,
    /// External auth uid of the submitter, when the submission came from a signed-in user.
    #[serde(rename = "userId")]
    pub external_user_ref: Option<String>,
    pub form_data: serde_json::Value,
    pub status: StagingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub migrated_at: Option<DateTime<Utc>>,
    /// Id of the permanent record created on approval.
    #[serde(rename = "mongoId")]
    pub record_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
}

impl StagingDocument {
    pub fn form_object(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.form_data.as_object()
    }
}

/// Input for creating a staged submission.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub kind: SubmissionKind,
    pub external_user_ref: Option<String>,
    pub form_data: serde_json::Value,
}

/// Pending counts per kind, for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStats {
    pub total: u64,
    pub loans: u64,
    pub insurances: u64,
    pub tickets: u64,
    pub chats: u64,
}

impl PendingStats {
    pub fn bump(&mut self, kind: SubmissionKind) {
        self.total += 1;
        match kind {
            SubmissionKind::Loan => self.loans += 1,
            SubmissionKind::Insurance => self.insurances += 1,
            SubmissionKind::Ticket => self.tickets += 1,
            SubmissionKind::Chat => self.chats += 1,
        }
    }
}

/// Opaque staging id: 32 lowercase hex characters, no dashes.
pub fn new_staging_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parse_is_case_insensitive() {
        assert_eq!(SubmissionKind::parse("Loan"), Some(SubmissionKind::Loan));
        assert_eq!(SubmissionKind::parse(" insurance "), Some(SubmissionKind::Insurance));
        assert_eq!(SubmissionKind::parse("contact"), None);
    }

    #[test]
    fn test_staging_document_uses_dashboard_field_names() {
        let now = Utc::now();
        let doc = StagingDocument {
            id: "d1".into(),
            kind: SubmissionKind::Loan,
            external_user_ref: Some("u1".into()),
            form_data: json!({"fullName": "A"}),
            status: StagingStatus::Pending,
            created_at: now,
            updated_at: now,
            migrated_at: None,
            record_id: None,
            rejection_reason: None,
            rejected_at: None,
            rejected_by: None,
        };

        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(v["type"], "loan");
        assert_eq!(v["userId"], "u1");
        assert_eq!(v["formData"]["fullName"], "A");
        assert_eq!(v["status"], "pending");
        assert!(v.get("mongoId").is_some());
    }

    #[test]
    fn test_pending_stats_bump() {
        let mut stats = PendingStats::default();
        stats.bump(SubmissionKind::Loan);
        stats.bump(SubmissionKind::Loan);
        stats.bump(SubmissionKind::Chat);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.loans, 2);
        assert_eq!(stats.chats, 1);
    }

    #[test]
    fn test_new_staging_id_has_no_dashes() {
        let id = new_staging_id();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }
}
