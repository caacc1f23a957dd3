use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loanzaar::auth::firebase::FirebaseVerifier;
use loanzaar::auth::jwt::InternalJwt;
use loanzaar::auth::Authenticator;
use loanzaar::config::{self, Config, StorageBackend};
use loanzaar::identity::IdentityResolver;
use loanzaar::models::principal::{Actor, Principal};
use loanzaar::models::staging::StagingDocument;
use loanzaar::models::user::{NewUser, UserRole};
use loanzaar::notification::fcm::{FcmGateway, ServiceAccount};
use loanzaar::notification::webhook::WebhookNotifier;
use loanzaar::notification::{DisabledGateway, NotificationGateway, Notifier};
use loanzaar::store::memory::MemoryStore;
use loanzaar::store::postgres::PgStore;
use loanzaar::store::{RecordStore, StagingStore, UserDirectory};
use loanzaar::workflow::{ApprovalWorkflow, ApproveOptions};
use loanzaar::{api, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "loanzaar"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json_logs = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    let (fmt_plain, fmt_json) = if json_logs {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "loanzaar=debug,tower_http=debug".into()),
        ))
        .with(fmt_plain)
        .with(fmt_json)
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
        Some(cli::Commands::Migrate) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Some(cli::Commands::AdminToken {
            id,
            email,
            role,
            hours,
        }) => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let token = InternalJwt::new(&cfg.jwt_secret).issue(
                &id,
                Some(&email),
                &role,
                chrono::Duration::hours(hours),
            )?;
            println!("{}", token);
            Ok(())
        }
        Some(cli::Commands::User { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_user_command(&db, command).await
        }
        Some(cli::Commands::Review { command }) => {
            let state = build_state(&cfg).await?;
            handle_review_command(&state, command).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Wire stores, authentication and notification channels from configuration.
async fn build_state(cfg: &Config) -> anyhow::Result<AppState> {
    let (staging, records, users, db): (
        Arc<dyn StagingStore>,
        Arc<dyn RecordStore>,
        Arc<dyn UserDirectory>,
        Option<PgStore>,
    ) = match cfg.storage {
        StorageBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(&cfg.database_url).await?;
            (
                Arc::new(db.clone()),
                Arc::new(db.clone()),
                Arc::new(db.clone()),
                Some(db),
            )
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage, data is lost on restart");
            let mem = MemoryStore::new();
            (
                Arc::new(mem.clone()),
                Arc::new(mem.clone()),
                Arc::new(mem),
                None,
            )
        }
    };

    let firebase = cfg.firebase_project_id.as_ref().map(|project| {
        tracing::info!(project = %project, "Firebase ID token verification enabled");
        FirebaseVerifier::new(project.clone(), cfg.firebase_jwks_url.clone())
    });
    if firebase.is_none() {
        tracing::warn!("FIREBASE_PROJECT_ID not set, only internal tokens are accepted");
    }

    let gateway: Arc<dyn NotificationGateway> = match &cfg.firebase_service_account {
        Some(raw) => {
            let sa = ServiceAccount::from_json(raw)?;
            tracing::info!(project = %sa.project_id, "FCM push enabled");
            Arc::new(FcmGateway::from_service_account(&cfg.fcm_base_url, sa))
        }
        None => {
            tracing::warn!("FIREBASE_SERVICE_ACCOUNT not set, push notifications disabled");
            Arc::new(DisabledGateway)
        }
    };

    let notifier = Notifier::new(
        gateway,
        WebhookNotifier::new(),
        cfg.webhook_urls.clone(),
        cfg.webhook_secret.clone(),
    );

    let workflow = ApprovalWorkflow::new(
        staging,
        records.clone(),
        IdentityResolver::new(users.clone()),
        notifier,
        cfg.field_defaults(),
    );

    Ok(AppState {
        workflow,
        auth: Authenticator::new(firebase, InternalJwt::new(&cfg.jwt_secret)),
        users,
        records,
        db,
    })
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let state = build_state(&cfg).await?;
    if let Some(db) = &state.db {
        tracing::info!("Running migrations...");
        db.migrate().await?;
    }
    let state = Arc::new(state);

    let app = api::app_router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors_layer(&cfg.frontend_origins));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("LoanZaar review service listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Allow the configured frontend origins plus localhost for development.
fn cors_layer(origins: &[String]) -> CorsLayer {
    use axum::http::{HeaderName, Method};
    use tower_http::cors::AllowOrigin;

    let origins = origins.to_vec();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            origins.iter().any(|o| o == origin_str)
                || origin_str.starts_with("http://localhost:")
                || origin_str.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true)
}

async fn handle_user_command(db: &PgStore, cmd: cli::UserCommands) -> anyhow::Result<()> {
    match cmd {
        cli::UserCommands::Add {
            external_id,
            name,
            email,
            admin,
        } => {
            let user = db
                .insert_user(NewUser {
                    external_auth_id: external_id,
                    name,
                    email,
                    role: if admin { UserRole::Admin } else { UserRole::User },
                })
                .await?;
            println!("User created: {} ({:?})", user.id, user.role);
        }
        cli::UserCommands::List => {
            let users = db.list_users().await?;
            if users.is_empty() {
                println!("No users.");
                return Ok(());
            }
            println!("{:<38} {:<8} {:<30} FIREBASE UID", "ID", "ROLE", "EMAIL");
            for u in users {
                println!(
                    "{:<38} {:<8} {:<30} {}",
                    u.id,
                    format!("{:?}", u.role).to_lowercase(),
                    u.email,
                    u.external_auth_id
                );
            }
        }
    }
    Ok(())
}

/// Terminal reviews act as an internal admin with no system-of-record identity,
/// so attribution falls through to the submitter or the oldest admin.
fn cli_actor() -> Actor {
    Actor::new(
        Principal::Internal {
            id: "cli".into(),
            email: None,
            role: "admin".into(),
        },
        None,
    )
}

fn print_documents(docs: &[StagingDocument]) {
    if docs.is_empty() {
        println!("No pending submissions.");
        return;
    }
    println!("{:<22} {:<10} {:<11} CREATED", "DOC ID", "TYPE", "STATUS");
    for d in docs {
        println!(
            "{:<22} {:<10} {:<11} {}",
            d.id, d.kind, d.status, d.created_at
        );
    }
}

async fn handle_review_command(state: &AppState, cmd: cli::ReviewCommands) -> anyhow::Result<()> {
    let workflow = &state.workflow;
    match cmd {
        cli::ReviewCommands::Pending { kind } => {
            let kind = kind.map(|k| loanzaar::models::record::RecordKind::from(k).submission_kind());
            let docs = workflow.list_pending(kind).await?;
            print_documents(&docs);
        }
        cli::ReviewCommands::Stats => {
            let stats = workflow.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        cli::ReviewCommands::Approve {
            kind,
            doc_id,
            notes,
            priority,
        } => {
            let outcome = workflow
                .approve(
                    kind.into(),
                    &doc_id,
                    &cli_actor(),
                    ApproveOptions {
                        admin_notes: notes,
                        priority,
                    },
                )
                .await?;
            println!(
                "Approved {} {} -> record {}",
                outcome.kind, outcome.doc_id, outcome.record_id
            );
        }
        cli::ReviewCommands::Reject {
            kind,
            doc_id,
            reason,
        } => {
            let outcome = workflow
                .reject(kind.into(), &doc_id, &cli_actor(), reason)
                .await?;
            println!("Rejected {} ({})", outcome.doc_id, outcome.reason);
        }
        cli::ReviewCommands::Status { doc_id, status } => {
            let status = workflow.update_status(&doc_id, &status).await?;
            println!("Document {} is now {}", doc_id, status);
        }
    }
    // Let spawned notifications finish before the process exits.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    Ok(())
}
