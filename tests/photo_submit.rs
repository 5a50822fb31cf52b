//! Public photo submission against a real database. Gated on
//! LAKEHENRY_TEST_DSN; without it these tests are no-ops.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use reqwest::Client;
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use lakehenry::api::{captcha::CaptchaVerifier, config::AppConfig, email::Mailer, router};
use lakehenry::kv::Kv;
use lakehenry::objects::ObjectStore;

async fn dsn_router(dsn: &str, data_dir: &std::path::Path) -> Result<(Router, PgPool)> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(dsn)
        .await
        .context("connecting to the test database")?;
    sqlx::migrate!("./migrations").run(&pool).await?;

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

    Ok((
        router(pool.clone(), kv, objects, config, captcha, mailer),
        pool,
    ))
}

fn submission_body(boundary: &str, submitted_by: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in [
        ("category", "Scenery"),
        ("title", "Sunrise over the lake"),
        ("caption", "Taken from the north shore"),
        ("alt", "Sun rising over calm water"),
        ("submittedBy", submitted_by),
    ] {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"photo\"; \
             filename=\"sunrise.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"\xff\xd8\xff\xe0 jpeg-ish payload");
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn submission_keeps_title_caption_and_submitter() -> Result<()> {
    let Ok(dsn) = std::env::var("LAKEHENRY_TEST_DSN") else {
        return Ok(());
    };
    let dir = tempfile::tempdir()?;
    let (app, pool) = dsn_router(&dsn, dir.path()).await?;

    // Unique marker so reruns never pick up an old row.
    let marker = format!("Tester {}", Uuid::new_v4());
    let boundary = "lakehenry-test-boundary";
    let response = app
        .oneshot(
            Request::post("/api/photos/submit")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(submission_body(boundary, &marker)))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok()),
        Some("/photos?submitted=1")
    );

    let row = sqlx::query(
        "SELECT title, caption, submitted_by, status FROM photos WHERE submitted_by = $1",
    )
    .bind(&marker)
    .fetch_one(&pool)
    .await?;
    assert_eq!(
        row.get::<Option<String>, _>("title").as_deref(),
        Some("Sunrise over the lake")
    );
    assert_eq!(
        row.get::<Option<String>, _>("caption").as_deref(),
        Some("Taken from the north shore")
    );
    assert_eq!(row.get::<String, _>("status"), "pending");

    sqlx::query("DELETE FROM photos WHERE submitted_by = $1")
        .bind(&marker)
        .execute(&pool)
        .await?;
    Ok(())
}
