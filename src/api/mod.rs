//! HTTP server wiring: database pool, shared extensions, routes, and the
//! admin gate.

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::{get, post},
    Extension, Router,
};
use reqwest::Client;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

pub mod captcha;
pub mod config;
pub mod datetime;
pub mod gate;
pub mod handlers;
pub mod session;

pub mod email;

pub use config::AppConfig;

use crate::{kv::Kv, objects::ObjectStore};

// Uploads plus multipart overhead.
const BODY_LIMIT: usize = handlers::MAX_UPLOAD_BYTES + 64 * 1024;

/// Start the server and block until it exits.
///
/// # Errors
/// Returns an error if the database, data directory, or listener are
/// unavailable.
pub async fn serve(port: u16, dsn: String, config: AppConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let objects = Arc::new(ObjectStore::open(&config.data_dir).await?);
    let kv = Arc::new(Kv::new());

    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;
    let captcha = Arc::new(captcha::CaptchaVerifier::new(
        client.clone(),
        config.turnstile_secret.clone(),
    ));
    let mailer = Arc::new(email::Mailer::new(
        client,
        config.resend_api_key.clone(),
        config.from_email.clone(),
        config.to_email.clone(),
    ));
    let config = Arc::new(config);

    let app = router(pool, kv, objects, config, captcha, mailer);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Assemble the application router. Split out of [`serve`] so tests can
/// drive it with an in-memory KV and a lazy pool.
#[must_use]
pub fn router(
    pool: sqlx::PgPool,
    kv: Arc<Kv>,
    objects: Arc<ObjectStore>,
    config: Arc<AppConfig>,
    captcha: Arc<captcha::CaptchaVerifier>,
    mailer: Arc<email::Mailer>,
) -> Router {
    Router::new()
        // public surface
        .route("/health", get(handlers::health::health))
        .route("/sitemap.xml", get(handlers::sitemap::handler))
        .route("/api/events/month", get(handlers::events::month))
        .route("/api/events/poster", get(handlers::events::poster_file))
        .route("/api/photos/submit", post(handlers::photos::submit))
        .route("/api/photos/file", get(handlers::photos::approved_file))
        .route("/api/raffle/month", get(handlers::raffle::month))
        .route(
            "/api/contact",
            post(handlers::contact::submit).options(handlers::contact::options),
        )
        // back office
        .route("/api/admin/login", post(handlers::login::login))
        .route("/api/admin/logout", post(handlers::login::logout))
        .route("/api/admin/donors", post(handlers::donors::create))
        .route("/api/admin/donors/delete", post(handlers::donors::delete))
        .route("/api/admin/events/create", post(handlers::events::create))
        .route("/api/admin/events/update", post(handlers::events::update))
        .route("/api/admin/events/delete", post(handlers::events::delete))
        .route(
            "/api/admin/events/toggle-status",
            post(handlers::events::toggle_status),
        )
        .route("/api/admin/events/poster", post(handlers::events::poster))
        .route(
            "/api/admin/photos/approve",
            post(handlers::photos::approve),
        )
        .route("/api/admin/photos/reject", post(handlers::photos::reject))
        .route("/api/admin/photos/delete", post(handlers::photos::delete))
        .route(
            "/api/admin/photos/file",
            get(handlers::photos::pending_file),
        )
        .route(
            "/api/admin/raffle/winners",
            get(handlers::raffle::winners).post(handlers::raffle::winners_mutate),
        )
        .route(
            "/api/admin/raffle/live",
            get(handlers::raffle::live_get).post(handlers::raffle::live_set),
        )
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
                .layer(DefaultBodyLimit::max(BODY_LIMIT))
                .layer(Extension(pool))
                .layer(Extension(kv))
                .layer(Extension(objects))
                .layer(Extension(config))
                .layer(Extension(captcha))
                .layer(Extension(mailer))
                // Extensions above are in scope by the time the gate runs.
                .layer(middleware::from_fn(gate::gate)),
        )
}

fn make_span(request: &Request<axum::body::Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
