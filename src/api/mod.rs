use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{metrics, AppState};

pub mod handlers;

/// Build the review API router.
/// All routes are relative; the caller mounts this under `/api/verify`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/pending", get(handlers::list_pending))
        .route("/stats", get(handlers::stats))
        .route("/approve-loan/:doc_id", post(handlers::approve_loan))
        .route("/approve-insurance/:doc_id", post(handlers::approve_insurance))
        .route("/approve-ticket/:doc_id", post(handlers::approve_ticket))
        .route("/reject-loan/:doc_id", post(handlers::reject_loan))
        .route("/reject-insurance/:doc_id", post(handlers::reject_insurance))
        .route("/reject-ticket/:doc_id", post(handlers::reject_ticket))
        .route("/update-status/:doc_id", post(handlers::update_status))
        .route(
            "/documents/:doc_id",
            get(handlers::get_document).delete(handlers::delete_document),
        )
        // Submitter side
        .route("/submissions", post(handlers::submit))
        .route("/mine", get(handlers::list_mine))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::auth::require_principal,
        ))
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
}

/// The full HTTP application: probes, metrics, and the review API.
/// CORS is layered on by the binary since it depends on deployment origins.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/verify", api_router(state.clone()))
        .fallback(fallback_404)
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    match &state.db {
        Some(db) => match db.ping().await {
            Ok(()) => "ok".into_response(),
            Err(e) => {
                tracing::warn!(error = %e, "readiness probe failed");
                (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response()
            }
        },
        None => "ok".into_response(),
    }
}

async fn metrics_handler() -> Response {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        metrics::encode_metrics(),
    )
        .into_response()
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // Review payloads carry personal data.
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}
