use crate::security::{
    audit::AuditTrail,
    clock::{Clock, SystemClock},
    external::{LogNotificationDispatcher, NotificationDispatcher},
    lockout::LockoutEngine,
    mfa::MfaEngine,
    orchestrator::SecurityOrchestrator,
    session::{self, SessionManager},
    settings::SettingsResolver,
};
use anyhow::{Context, Result};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{delete, get, post, put},
};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;

pub(crate) mod handlers;
pub(crate) mod verifier;

const DEFAULT_AUTH_TIMEOUT_SECONDS: u64 = 5;

/// Server-level knobs that do not live in the database.
#[derive(Clone)]
pub struct ApiConfig {
    pepper: SecretString,
    issuer: String,
    auth_timeout: Duration,
}

impl ApiConfig {
    #[must_use]
    pub fn new(pepper: SecretString, issuer: String) -> Self {
        Self {
            pepper,
            issuer,
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECONDS),
        }
    }

    #[must_use]
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }
}

/// Build the API router. Shared state arrives via `Extension` layers.
#[must_use]
pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/health", get(handlers::health::health))
        .route("/v1/auth/login", post(handlers::auth::login))
        .route("/v1/auth/mfa/verify", post(handlers::auth::verify_mfa))
        .route("/v1/mfa/status", get(handlers::mfa::status))
        .route("/v1/mfa/totp/setup", post(handlers::mfa::setup_totp))
        .route("/v1/mfa/totp/confirm", post(handlers::mfa::confirm_totp))
        .route("/v1/mfa/totp", delete(handlers::mfa::disable_totp))
        .route("/v1/mfa/email-otp/send", post(handlers::mfa::send_email_otp))
        .route(
            "/v1/mfa/backup-codes",
            post(handlers::mfa::regenerate_backup_codes),
        )
        .route("/v1/sessions", get(handlers::sessions::list))
        .route("/v1/sessions/:session_id", delete(handlers::sessions::terminate))
        .route(
            "/v1/sessions/revoke-others",
            post(handlers::sessions::revoke_others),
        )
        .route("/v1/security/settings", get(handlers::settings::get))
        .route("/v1/security/settings", put(handlers::settings::update))
        .route("/v1/security/lockout", get(handlers::lockout::status))
        .route(
            "/v1/security/lockout/release",
            post(handlers::lockout::release),
        )
}

/// Start the server.
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, config: ApiConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notifier: Arc<dyn NotificationDispatcher> = Arc::new(LogNotificationDispatcher);
    let settings = SettingsResolver::new(pool.clone(), Arc::clone(&clock));
    let audit = AuditTrail::new(pool.clone(), Arc::clone(&clock));
    let lockout = LockoutEngine::new(
        pool.clone(),
        Arc::clone(&clock),
        settings.clone(),
        audit.clone(),
        Arc::clone(&notifier),
    );
    let mfa = MfaEngine::new(
        pool.clone(),
        Arc::clone(&clock),
        audit.clone(),
        Arc::clone(&notifier),
        config.pepper.clone(),
        config.issuer.clone(),
    );
    let sessions = SessionManager::new(pool.clone(), Arc::clone(&clock), settings.clone());
    let orchestrator = SecurityOrchestrator::new(
        Arc::new(verifier::PgCredentialVerifier::new(
            pool.clone(),
            config.pepper.clone(),
        )),
        Arc::clone(&clock),
        settings.clone(),
        audit,
        lockout.clone(),
        mfa.clone(),
        sessions.clone(),
    );

    // Expired sessions self-heal on touch; the sweeper keeps the books
    // accurate for everything nobody touches.
    tokio::spawn(session::run_sweeper(sessions.clone()));

    let state = Arc::new(handlers::SecurityState {
        orchestrator,
        lockout,
        mfa,
        sessions,
        settings,
        auth_timeout: config.auth_timeout,
    });

    let app = router()
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
