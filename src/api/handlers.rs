use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::admin_actor;
use crate::errors::AppError;
use crate::models::principal::{Actor, Principal};
use crate::models::record::RecordKind;
use crate::models::staging::{StagingDocument, SubmissionKind};
use crate::workflow::ApproveOptions;
use crate::AppState;

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub admin_notes: Option<String>,
    /// Tickets only.
    pub priority: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    pub rejection_reason: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct StatusRequest {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct PendingParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub form_data: Value,
}

// ── Helpers ──────────────────────────────────────────────────

async fn require_admin(state: &AppState, principal: Principal) -> Result<Actor, AppError> {
    admin_actor(principal, state.users.as_ref()).await
}

/// Bodies are optional on review actions: no JSON content type means defaults.
/// A body that was sent but does not parse is refused rather than ignored.
fn optional_body<T: Default>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    match body {
        Ok(Json(b)) => Ok(b),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(e) => Err(AppError::BadRequest(e.body_text())),
    }
}

fn display_kind(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Loan => "Loan",
        RecordKind::Insurance => "Insurance",
        RecordKind::Ticket => "Ticket",
    }
}

async fn approve(
    state: &AppState,
    principal: Principal,
    kind: RecordKind,
    doc_id: &str,
    body: Result<Json<ApproveRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let actor = require_admin(state, principal).await?;
    let body = optional_body(body)?;

    let outcome = state
        .workflow
        .approve(
            kind,
            doc_id,
            &actor,
            ApproveOptions {
                admin_notes: body.admin_notes,
                priority: body.priority,
            },
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("{} approved and migrated", display_kind(kind)),
        "mongoId": outcome.record_id,
        "firestoreDocId": outcome.doc_id,
    })))
}

async fn reject(
    state: &AppState,
    principal: Principal,
    kind: RecordKind,
    doc_id: &str,
    body: Result<Json<RejectRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let actor = require_admin(state, principal).await?;
    let body = optional_body(body)?;

    let outcome = state
        .workflow
        .reject(kind, doc_id, &actor, body.rejection_reason)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("{} rejected", display_kind(kind)),
        "firestoreDocId": outcome.doc_id,
        "rejectionReason": outcome.reason,
    })))
}

// ── Review Handlers (admin) ──────────────────────────────────

/// GET /api/verify/pending?type=loan
pub async fn list_pending(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<PendingParams>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state, principal).await?;

    match params.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        Some(raw) => {
            let kind = SubmissionKind::parse(raw)
                .ok_or_else(|| AppError::BadRequest(format!("unknown submission type `{raw}`")))?;
            let docs = state.workflow.list_pending(Some(kind)).await?;
            Ok(Json(json!({
                "success": true,
                "count": docs.len(),
                "data": docs,
            })))
        }
        None => {
            let overview = state.workflow.pending_overview().await?;
            Ok(Json(json!({
                "success": true,
                "stats": overview.stats,
                "data": {
                    "loans": overview.loans,
                    "insurances": overview.insurances,
                    "tickets": overview.tickets,
                },
            })))
        }
    }
}

/// GET /api/verify/stats
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state, principal).await?;
    let stats = state.workflow.stats().await?;
    Ok(Json(json!({ "success": true, "data": stats })))
}

/// POST /api/verify/approve-loan/:docId
pub async fn approve_loan(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(doc_id): Path<String>,
    body: Result<Json<ApproveRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    approve(&state, principal, RecordKind::Loan, &doc_id, body).await
}

/// POST /api/verify/approve-insurance/:docId
pub async fn approve_insurance(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(doc_id): Path<String>,
    body: Result<Json<ApproveRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    approve(&state, principal, RecordKind::Insurance, &doc_id, body).await
}

/// POST /api/verify/approve-ticket/:docId
pub async fn approve_ticket(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(doc_id): Path<String>,
    body: Result<Json<ApproveRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    approve(&state, principal, RecordKind::Ticket, &doc_id, body).await
}

/// POST /api/verify/reject-loan/:docId
pub async fn reject_loan(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(doc_id): Path<String>,
    body: Result<Json<RejectRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    reject(&state, principal, RecordKind::Loan, &doc_id, body).await
}

/// POST /api/verify/reject-insurance/:docId
pub async fn reject_insurance(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(doc_id): Path<String>,
    body: Result<Json<RejectRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    reject(&state, principal, RecordKind::Insurance, &doc_id, body).await
}

/// POST /api/verify/reject-ticket/:docId
pub async fn reject_ticket(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(doc_id): Path<String>,
    body: Result<Json<RejectRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    reject(&state, principal, RecordKind::Ticket, &doc_id, body).await
}

/// POST /api/verify/update-status/:docId
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(doc_id): Path<String>,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state, principal).await?;
    let status = optional_body(body)?
        .status
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Status is required".into()))?;

    let updated = state.workflow.update_status(&doc_id, &status).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Status updated to {updated}"),
        "firestoreDocId": doc_id,
    })))
}

/// GET /api/verify/documents/:docId (includes the permanent record once approved)
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(doc_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    require_admin(&state, principal).await?;
    let doc = state.workflow.get(&doc_id).await?;
    let record = linked_record(&state, &doc).await?;
    Ok(Json(json!({ "success": true, "data": doc, "record": record })))
}

async fn linked_record(state: &AppState, doc: &StagingDocument) -> Result<Value, AppError> {
    let Some(id) = doc.record_id else {
        return Ok(Value::Null);
    };
    let value = match doc.kind {
        SubmissionKind::Loan => json!(state.records.get_loan(id).await?),
        SubmissionKind::Insurance => json!(state.records.get_insurance(id).await?),
        SubmissionKind::Ticket => json!(state.records.get_ticket(id).await?),
        SubmissionKind::Chat => Value::Null,
    };
    Ok(value)
}

/// DELETE /api/verify/documents/:docId
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(doc_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let actor = require_admin(&state, principal).await?;
    state.workflow.delete(&doc_id).await?;
    tracing::info!(doc_id = %doc_id, deleted_by = %actor.subject(), "document deleted by admin");
    Ok(Json(json!({
        "success": true,
        "message": "Document deleted",
        "firestoreDocId": doc_id,
    })))
}

// ── Submitter Handlers (any principal) ───────────────────────

/// POST /api/verify/submissions
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<SubmissionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let kind = SubmissionKind::parse(&payload.kind).ok_or_else(|| {
        AppError::BadRequest(format!("unknown submission type `{}`", payload.kind))
    })?;
    if !payload.form_data.is_object() {
        return Err(AppError::BadRequest("formData must be a JSON object".into()));
    }

    let doc = state
        .workflow
        .submit(kind, payload.form_data, &principal)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Submission received and pending review",
            "firestoreDocId": doc.id,
        })),
    ))
}

/// GET /api/verify/mine
pub async fn list_mine(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, AppError> {
    let docs = state.workflow.list_for_user(&principal).await?;
    Ok(Json(json!({
        "success": true,
        "count": docs.len(),
        "data": docs,
    })))
}
