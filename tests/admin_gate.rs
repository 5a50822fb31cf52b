//! End-to-end exercise of the admin gate, login flow, and lockout using
//! the in-process router. The database pool is lazy, so every request
//! here stays on paths that never reach Postgres.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use reqwest::Client;
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower::ServiceExt;

use lakehenry::api::{captcha::CaptchaVerifier, config::AppConfig, email::Mailer, router};
use lakehenry::kv::Kv;
use lakehenry::objects::ObjectStore;

async fn test_router(data_dir: &std::path::Path) -> Result<Router> {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://postgres@localhost:1/unreachable")
        .context("lazy pool")?;

    let config = Arc::new(AppConfig {
        base_url: "https://lakehenry.org".to_string(),
        data_dir: data_dir.to_path_buf(),
        admin_username: "admin".to_string(),
        admin_password: SecretString::from("hunter2"),
        cookie_secret: SecretString::from("legacy-secret"),
        turnstile_secret: SecretString::from("ts-secret"),
        resend_api_key: SecretString::from("re-key"),
        from_email: "site@lakehenry.org".to_string(),
        to_email: "board@lakehenry.org".to_string(),
    });

    let client = Client::new();
    let captcha = Arc::new(CaptchaVerifier::new(
        client.clone(),
        config.turnstile_secret.clone(),
    ));
    let mailer = Arc::new(Mailer::new(
        client,
        config.resend_api_key.clone(),
        config.from_email.clone(),
        config.to_email.clone(),
    ));
    let objects = Arc::new(ObjectStore::open(data_dir).await?);
    let kv = Arc::new(Kv::new());

    Ok(router(pool, kv, objects, config, captcha, mailer))
}

// Mutating admin calls fail closed without a same-origin proof, so the
// helper sends the Host/Origin pair a browser form post would carry.
fn form_post(path: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        )
        .header(header::HOST, "lakehenry.org")
        .header(header::ORIGIN, "https://lakehenry.org")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn session_cookie_from(response: &axum::response::Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("admin_session=") && !value.starts_with("admin_session=;"))
        .and_then(|value| value.split(';').next())
        .map(ToString::to_string)
}

#[tokio::test]
async fn health_is_public() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = test_router(dir.path()).await?;

    let response = app
        .oneshot(Request::get("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    Ok(())
}

#[tokio::test]
async fn sitemap_is_public_and_cached() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = test_router(dir.path()).await?;

    let response = app
        .oneshot(Request::get("/sitemap.xml").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=3600"
    );
    let body = response.into_body().collect().await?.to_bytes();
    let xml = String::from_utf8(body.to_vec())?;
    assert!(xml.contains("<loc>https://lakehenry.org/events</loc>"));
    Ok(())
}

#[tokio::test]
async fn admin_ui_redirects_to_login() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = test_router(dir.path()).await?;

    let response = app
        .oneshot(Request::get("/admin/donors").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(location.starts_with("/admin/login?err=auth&next=%2Fadmin%2Fdonors"));
    Ok(())
}

#[tokio::test]
async fn admin_api_rejects_without_session() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = test_router(dir.path()).await?;

    let response = app
        .oneshot(
            Request::get("/api/admin/raffle/winners?raffleKey=2026-03").body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn cross_origin_mutation_is_forbidden_even_with_session() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = test_router(dir.path()).await?;

    let login = app
        .clone()
        .oneshot(form_post(
            "/api/admin/login",
            "username=admin&password=hunter2",
        ))
        .await?;
    let cookie = session_cookie_from(&login).context("login cookie")?;

    let mut request = form_post("/api/admin/donors", "name=Pat&amount=50");
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse()?);
    request
        .headers_mut()
        .insert(header::ORIGIN, "https://evil.example".parse()?);

    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn login_then_logout_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = test_router(dir.path()).await?;

    // Wrong password: generic error flag, no cookie.
    let response = app
        .clone()
        .oneshot(form_post(
            "/api/admin/login",
            "username=admin&password=wrong",
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(location.starts_with("/admin/login?err=1"));
    assert!(session_cookie_from(&response).is_none());

    // Correct credentials: session cookie plus redirect to the requested
    // back-office page.
    let response = app
        .clone()
        .oneshot(form_post(
            "/api/admin/login",
            "username=admin&password=hunter2&next=%2Fadmin%2Fevents",
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/admin/events"
    );
    let cookie = session_cookie_from(&response).context("session cookie")?;

    // The session opens the admin API (KV-backed endpoint, no database).
    let mut request = Request::get("/api/admin/raffle/live").body(Body::empty())?;
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse()?);
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );

    // Logout revokes the server-side session; the same cookie is dead.
    let mut request = form_post("/api/admin/logout", "");
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse()?);
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let mut request = Request::get("/api/admin/raffle/live").body(Body::empty())?;
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse()?);
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn repeated_failures_lock_out_the_correct_password() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = test_router(dir.path()).await?;

    for _ in 0..10 {
        let response = app
            .clone()
            .oneshot(form_post(
                "/api/admin/login",
                "username=admin&password=wrong",
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    // Eleventh attempt with the right password answers exactly like a bad
    // one while the window is open.
    let response = app
        .clone()
        .oneshot(form_post(
            "/api/admin/login",
            "username=admin&password=hunter2",
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(location.starts_with("/admin/login?err=1"));
    assert!(session_cookie_from(&response).is_none());
    Ok(())
}

#[tokio::test]
async fn contact_rejects_wrong_content_type_without_upstream_calls() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = test_router(dir.path()).await?;

    let request = Request::builder()
        .method("POST")
        .uri("/api/contact")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/contact?err=input"
    );
    Ok(())
}

#[tokio::test]
async fn contact_preflight_is_open() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = test_router(dir.path()).await?;

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/contact")
        .body(Body::empty())?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-methods")
            .unwrap(),
        "POST,OPTIONS"
    );
    Ok(())
}
