use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use murmur_api::auth::{self, AppState, AppStateInner};
use murmur_api::mailer::ResendMailer;
use murmur_api::middleware::require_auth;
use murmur_api::suggest::Suggester;
use murmur_api::{acceptance, messages, suggest, users};

/// Placeholder JWT secrets that MUST NOT reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("MURMUR_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        warn!("MURMUR_JWT_SECRET is a placeholder; fine for dev, never for production");
    }
    let db_path = std::env::var("MURMUR_DB_PATH").unwrap_or_else(|_| "murmur.db".into());
    let host = std::env::var("MURMUR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("MURMUR_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    let resend_api_key = std::env::var("RESEND_API_KEY").unwrap_or_default();
    if resend_api_key.is_empty() {
        warn!("RESEND_API_KEY is unset; verification emails will fail to deliver");
    }
    let email_from = std::env::var("MURMUR_EMAIL_FROM")
        .unwrap_or_else(|_| "murmur <onboarding@resend.dev>".into());

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
    let gemini_model =
        std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".into());

    // Init database
    let db = murmur_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret,
        mailer: Box::new(ResendMailer::new(resend_api_key, email_from)),
        suggester: Suggester::new(gemini_api_key, gemini_model),
    });

    // Routes
    let public_routes = Router::new()
        .route("/api/check-username-unique", get(auth::check_username))
        .route("/api/sign-up", post(auth::sign_up))
        .route("/api/verify-code", post(auth::verify_code))
        .route("/api/sign-in", post(auth::sign_in))
        .route("/api/send-messages", post(messages::send_message))
        .route("/api/get-all-users", get(users::list_users))
        .route("/api/suggest-messages", post(suggest::suggest_messages))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route(
            "/api/accept-messages",
            get(acceptance::get_accepting).post(acceptance::set_accepting),
        )
        .route("/api/get-messages", get(messages::get_messages))
        .route("/api/delete-message/{message_id}", delete(messages::delete_message))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let app = Router::new()
        .route("/health", get(health))
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("murmur server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
