//! HTTP surface tests: routing, bearer auth, the admin gate and error mapping.
//!
//! Drives the full router with `tower::ServiceExt::oneshot` over the in-memory store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use loanzaar::api::app_router;
use loanzaar::auth::jwt::InternalJwt;
use loanzaar::auth::Authenticator;
use loanzaar::identity::IdentityResolver;
use loanzaar::models::staging::{StagingDocument, StagingStatus, SubmissionKind};
use loanzaar::models::user::{NewUser, User, UserRole};
use loanzaar::notification::{DisabledGateway, Notifier};
use loanzaar::store::memory::MemoryStore;
use loanzaar::store::UserDirectory;
use loanzaar::workflow::mapping::FieldDefaults;
use loanzaar::workflow::ApprovalWorkflow;
use loanzaar::AppState;

const SECRET: &str = "api-routes-test-secret";

struct TestApp {
    router: Router,
    store: MemoryStore,
    jwt: InternalJwt,
}

impl TestApp {
    fn new() -> Self {
        let store = MemoryStore::new();
        let workflow = ApprovalWorkflow::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            IdentityResolver::new(Arc::new(store.clone())),
            Notifier::push_only(Arc::new(DisabledGateway)),
            FieldDefaults::default(),
        );
        let state = Arc::new(AppState {
            workflow,
            auth: Authenticator::new(None, InternalJwt::new(SECRET)),
            users: Arc::new(store.clone()),
            records: Arc::new(store.clone()),
            db: None,
        });
        Self {
            router: app_router(state),
            store,
            jwt: InternalJwt::new(SECRET),
        }
    }

    fn token(&self, role: &str) -> String {
        self.jwt
            .issue(
                &Uuid::new_v4().to_string(),
                Some("someone@loanzaar.test"),
                role,
                chrono::Duration::hours(1),
            )
            .unwrap()
    }

    fn admin(&self) -> String {
        self.token("admin")
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Stage a submission through the API as a signed-in user.
    async fn submit(&self, kind: &str, form: Value) -> String {
        let user = self.token("user");
        let (status, body) = self
            .call(
                Method::POST,
                "/api/verify/submissions",
                Some(&user),
                Some(json!({ "type": kind, "formData": form })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["firestoreDocId"].as_str().unwrap().to_string()
    }

    async fn seed_admin(&self) {
        self.store
            .insert_user(NewUser {
                external_auth_id: "fb-admin".into(),
                name: "Admin".into(),
                email: "admin@loanzaar.test".into(),
                role: UserRole::Admin,
            })
            .await
            .unwrap();
    }
}

fn loan_form() -> Value {
    json!({
        "fullName": "Asha Verma",
        "email": "asha@example.com",
        "phone": "9876543210",
        "loanType": "Home",
        "loanAmount": 2500000,
        "consent": true
    })
}

#[tokio::test]
async fn test_health_and_security_headers() {
    let app = TestApp::new();
    let resp = app
        .router
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert_eq!(resp.headers()["cache-control"], "no-store");

    let (status, _) = app.call(Method::GET, "/readyz", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let app = TestApp::new();

    let (status, body) = app.call(Method::GET, "/api/verify/pending", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "unauthorized");

    let forged = InternalJwt::new("some-other-secret")
        .issue("x", None, "admin", chrono::Duration::hours(1))
        .unwrap();
    let (status, _) = app
        .call(Method::GET, "/api/verify/pending", Some(&forged), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_non_admin_cannot_review() {
    let app = TestApp::new();
    let doc_id = app.submit("loan", loan_form()).await;
    let user = app.token("user");

    let (status, body) = app
        .call(Method::GET, "/api/verify/pending", Some(&user), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/verify/approve-loan/{doc_id}"),
            Some(&user),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_pending_listing_grouped_and_filtered() {
    let app = TestApp::new();
    app.submit("loan", loan_form()).await;
    app.submit("ticket", json!({"subject": "Callback please"})).await;
    let admin = app.admin();

    let (status, body) = app
        .call(Method::GET, "/api/verify/pending", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["total"], 2);
    assert_eq!(body["data"]["loans"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["tickets"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["loans"][0]["type"], "loan");
    assert_eq!(body["data"]["loans"][0]["status"], "pending");

    let (status, body) = app
        .call(Method::GET, "/api/verify/pending?type=ticket", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, _) = app
        .call(Method::GET, "/api/verify/pending?type=mortgage", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_approve_then_conflict() {
    let app = TestApp::new();
    app.seed_admin().await;
    let doc_id = app.submit("loan", loan_form()).await;
    let admin = app.admin();
    let uri = format!("/api/verify/approve-loan/{doc_id}");

    let (status, body) = app
        .call(Method::POST, &uri, Some(&admin), Some(json!({"adminNotes": "ok"})))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["firestoreDocId"], doc_id);
    assert!(body["mongoId"].as_str().is_some());

    let (status, body) = app.call(Method::POST, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "already_approved");

    let (status, body) = app
        .call(Method::GET, &format!("/api/verify/documents/{doc_id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "approved");
    assert_eq!(body["record"]["loanType"], "Home");
    assert_eq!(body["record"]["adminNotes"], "ok");
}

#[tokio::test]
async fn test_approved_document_leaves_pending_list() {
    let app = TestApp::new();
    let member = Uuid::new_v4();
    app.store.put_user(User {
        id: member,
        external_auth_id: "u1".into(),
        name: "Member".into(),
        email: "u1@loanzaar.test".into(),
        role: UserRole::User,
        created_at: chrono::Utc::now(),
    });
    let now = chrono::Utc::now();
    app.store.put_document(StagingDocument {
        id: "d1".into(),
        kind: SubmissionKind::Loan,
        external_user_ref: Some("u1".into()),
        form_data: json!({
            "fullName": "A",
            "email": "a@x.com",
            "phone": "1",
            "loanType": "Personal",
            "loanAmount": 50000
        }),
        status: StagingStatus::Pending,
        created_at: now,
        updated_at: now,
        migrated_at: None,
        record_id: None,
        rejection_reason: None,
        rejected_at: None,
        rejected_by: None,
    });
    let admin = app.admin();

    let (_, body) = app
        .call(Method::GET, "/api/verify/pending?type=loan", Some(&admin), None)
        .await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["id"], "d1");

    let (status, body) = app
        .call(Method::POST, "/api/verify/approve-loan/d1", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["firestoreDocId"], "d1");
    let record_id = body["mongoId"].as_str().unwrap().to_string();

    let (status, body) = app
        .call(Method::GET, "/api/verify/pending?type=loan", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    let (_, body) = app
        .call(Method::GET, "/api/verify/documents/d1", Some(&admin), None)
        .await;
    assert_eq!(body["record"]["id"], record_id);
    assert_eq!(body["record"]["createdById"], member.to_string());
    assert_eq!(body["record"]["createdBy"], "user");
    assert_eq!(body["record"]["cityState"], Value::Null);
}

#[tokio::test]
async fn test_malformed_body_is_refused() {
    let app = TestApp::new();
    let doc_id = app.submit("loan", loan_form()).await;
    let admin = app.admin();

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/verify/reject-loan/{doc_id}"),
            Some(&admin),
            Some(json!({"rejectionReason": ["Insufficient income proof"]})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/verify/update-status/{doc_id}"),
            Some(&admin),
            Some(json!({"status": 7})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::post(format!("/api/verify/approve-loan/{doc_id}"))
        .header(header::AUTHORIZATION, format!("Bearer {admin}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"adminNotes\": "))
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let (_, body) = app
        .call(Method::GET, &format!("/api/verify/documents/{doc_id}"), Some(&admin), None)
        .await;
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["rejectionReason"], Value::Null);
}

#[tokio::test]
async fn test_approve_error_mapping() {
    let app = TestApp::new();
    let admin = app.admin();
    let doc_id = app.submit("loan", loan_form()).await;

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/verify/approve-insurance/{doc_id}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "type_mismatch");

    let (status, _) = app
        .call(Method::POST, "/api/verify/approve-loan/unknown", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Empty directory: nobody to attribute the record to.
    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/verify/approve-loan/{doc_id}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "no_creator_resolvable");
}

#[tokio::test]
async fn test_validation_failure_returns_field_report() {
    let app = TestApp::new();
    app.seed_admin().await;
    let admin = app.admin();
    let doc_id = app
        .submit("insurance", json!({"fullName": "R", "email": "r@x.com", "age": 12}))
        .await;

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/verify/approve-insurance/{doc_id}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "validation_failed");
    let fields: Vec<&str> = body["validation"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["field"].as_str())
        .collect();
    assert!(fields.contains(&"phone"));
    assert!(fields.contains(&"insuranceType"));
    assert!(fields.contains(&"age"));
    assert_eq!(body["preview"]["fullName"], "R");
}

#[tokio::test]
async fn test_reject_and_update_status() {
    let app = TestApp::new();
    let admin = app.admin();
    let doc_id = app.submit("ticket", json!({"subject": "Wrong EMI"})).await;

    let (status, body) = app
        .call(Method::POST, &format!("/api/verify/update-status/{doc_id}"), Some(&admin), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Status is required");

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/verify/update-status/{doc_id}"),
            Some(&admin),
            Some(json!({"status": "approved"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_transition");

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/verify/update-status/{doc_id}"),
            Some(&admin),
            Some(json!({"status": "processing"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(Method::POST, &format!("/api/verify/reject-ticket/{doc_id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rejectionReason"], "Not approved");

    let (_, body) = app
        .call(Method::GET, &format!("/api/verify/documents/{doc_id}"), Some(&admin), None)
        .await;
    assert_eq!(body["data"]["status"], "rejected");
    assert_eq!(body["data"]["rejectionReason"], "Not approved");
    assert!(body["record"].is_null());
}

#[tokio::test]
async fn test_submissions_are_scoped_to_the_caller() {
    let app = TestApp::new();
    let alice = app.token("user");
    let bob = app.token("user");

    let (status, _) = app
        .call(
            Method::POST,
            "/api/verify/submissions",
            Some(&alice),
            Some(json!({"type": "loan", "formData": loan_form()})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/verify/submissions",
            Some(&alice),
            Some(json!({"type": "loan", "formData": "not an object"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app.call(Method::GET, "/api/verify/mine", Some(&alice), None).await;
    assert_eq!(body["count"], 1);
    let (_, body) = app.call(Method::GET, "/api/verify/mine", Some(&bob), None).await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_delete_and_metrics() {
    let app = TestApp::new();
    let admin = app.admin();
    let doc_id = app.submit("chat", json!({"message": "hello"})).await;

    let uri = format!("/api/verify/documents/{doc_id}");
    let (status, _) = app.call(Method::DELETE, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.call(Method::DELETE, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Produce at least one transition sample.
    app.call(Method::POST, "/api/verify/reject-loan/missing", Some(&admin), None)
        .await;
    let resp = app
        .router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains("loanzaar_transitions_total"));
}
