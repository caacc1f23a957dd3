//! LoanZaar review service: staged submissions, admin review, system of record.
//!
//! Library crate shared by the binary and the integration tests in `tests/`.

pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod store;
pub mod workflow;

use std::sync::Arc;

use auth::Authenticator;
use store::postgres::PgStore;
use store::{RecordStore, UserDirectory};
use workflow::ApprovalWorkflow;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub workflow: ApprovalWorkflow,
    pub auth: Authenticator,
    pub users: Arc<dyn UserDirectory>,
    pub records: Arc<dyn RecordStore>,
    /// Present when running against Postgres; used by the readiness probe.
    pub db: Option<PgStore>,
}
