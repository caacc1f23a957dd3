use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::store::StoreError;

/// One rejected field of a record that failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Field-level validation failures plus the attempted values, for operator debugging.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<FieldError>,
    pub preview: serde_json::Value,
}

impl ValidationReport {
    pub fn fields(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.field.as_str()).collect()
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("document {0} not found")]
    NotFound(String),

    #[error("document is not {expected}")]
    TypeMismatch { expected: &'static str },

    #[error("{0} already approved")]
    AlreadyApproved(&'static str),

    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("no user found to set createdById; cannot migrate {0}")]
    NoCreatorResolvable(&'static str),

    #[error("{kind} failed validation: {}", .report.fields().join(", "))]
    ValidationFailed {
        kind: &'static str,
        report: ValidationReport,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// Stable machine-readable code, shared by API responses and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::NotFound(_) => "not_found",
            WorkflowError::TypeMismatch { .. } => "type_mismatch",
            WorkflowError::AlreadyApproved(_) => "already_approved",
            WorkflowError::InvalidTransition(_) => "invalid_transition",
            WorkflowError::NoCreatorResolvable(_) => "no_creator_resolvable",
            WorkflowError::ValidationFailed { .. } => "validation_failed",
            WorkflowError::Store(_) => "internal_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("access denied: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Workflow(WorkflowError::Store(e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut extra = serde_json::Map::new();

        let (status, code, msg) = match &self {
            AppError::Workflow(WorkflowError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "not_found", "Document not found".to_string())
            }
            AppError::Workflow(e @ WorkflowError::TypeMismatch { .. }) => {
                (StatusCode::BAD_REQUEST, "type_mismatch", capitalize(&e.to_string()))
            }
            AppError::Workflow(e @ WorkflowError::AlreadyApproved(_)) => {
                (StatusCode::CONFLICT, "already_approved", capitalize(&e.to_string()))
            }
            AppError::Workflow(e @ WorkflowError::InvalidTransition(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_transition", capitalize(&e.to_string()))
            }
            AppError::Workflow(e @ WorkflowError::NoCreatorResolvable(kind)) => {
                tracing::error!(kind = %kind, "no creator resolvable");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "no_creator_resolvable",
                    capitalize(&e.to_string()),
                )
            }
            AppError::Workflow(WorkflowError::ValidationFailed { kind, report }) => {
                tracing::error!(kind = %kind, fields = ?report.fields(), "record validation failed");
                extra.insert("validation".into(), json!(report.errors));
                extra.insert("preview".into(), report.preview.clone());
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "validation_failed",
                    format!("Failed to approve {}", kind),
                )
            }
            AppError::Workflow(WorkflowError::Store(e)) => {
                tracing::error!("store error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Auth(e) => (StatusCode::UNAUTHORIZED, "unauthorized", e.to_string()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.clone()),
            AppError::Internal(e) => {
                tracing::error!("internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = serde_json::Map::new();
        body.insert("success".into(), json!(false));
        body.insert("message".into(), json!(msg));
        body.insert("error".into(), json!({ "code": code }));
        body.extend(extra);

        (status, Json(serde_json::Value::Object(body))).into_response()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
