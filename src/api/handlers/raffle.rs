//! Monthly raffle back office: the winner ledger, per-month metadata, and
//! the livestream link shown on the raffle page.
//!
//! Winner ids are deterministic (`<raffleKey>-<drawDate>-<ticket>`) so
//! re-submitting the same drawing edits the existing row instead of
//! duplicating it.

use anyhow::{Context, Result};
use axum::{
    extract::Query,
    http::StatusCode,
    response::Response,
    Extension, Json,
};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Row};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, Instrument};

use crate::api::datetime::{current_month_key, is_month_key, is_real_iso_date, month_key_label};
use crate::api::handlers::{events::resolve_month, json_response};
use crate::kv::Kv;

/// Facebook page the livestream links must belong to.
const FACEBOOK_PAGE_ID: &str = "61552199315213";

const LIVE_KV_KEY: &str = "raffle_live";

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct WinnerRow {
    id: String,
    #[serde(rename = "raffleKey")]
    raffle_key: String,
    #[serde(rename = "drawDate")]
    draw_date: String,
    #[serde(rename = "ticketNumber")]
    ticket: i32,
    name: String,
    town: String,
    prize: Option<String>,
}

async fn winners_for(pool: &PgPool, raffle_key: &str) -> Result<Vec<WinnerRow>> {
    let query = r"
        SELECT id, raffle_key, draw_date, ticket, name, town, prize
        FROM raffle_winners
        WHERE raffle_key = $1
        ORDER BY draw_date DESC, ticket ASC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_as::<_, WinnerRow>(query)
        .bind(raffle_key)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list raffle winners")
}

#[derive(Debug, Deserialize)]
pub struct WinnersQuery {
    #[serde(default, rename = "raffleKey")]
    raffle_key: String,
}

pub async fn winners(
    Extension(pool): Extension<PgPool>,
    Query(query): Query<WinnersQuery>,
) -> Response {
    let raffle_key = query.raffle_key.trim();
    if !is_month_key(raffle_key) {
        return json_response(
            StatusCode::BAD_REQUEST,
            &json!({"ok": false, "error": "raffleKey must look like YYYY-MM"}),
        );
    }
    match winners_for(&pool, raffle_key).await {
        Ok(winners) => json_response(StatusCode::OK, &json!({"ok": true, "winners": winners})),
        Err(err) => {
            error!("winner list failed: {err}");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"ok": false, "error": "server"}),
            )
        }
    }
}

/// Collapse anything outside `[A-Za-z0-9_-]` so the composed id is safe in
/// URLs and form values.
fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct WinnerAction {
    #[serde(default)]
    action: String,
    #[serde(default)]
    id: String,
    #[serde(default, rename = "drawDate")]
    draw_date: String,
    #[serde(default, rename = "ticketNumber")]
    ticket: Option<i64>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    town: String,
    #[serde(default)]
    prize: String,
    #[serde(default, rename = "monthKey")]
    month_key: String,
    #[serde(default)]
    title: String,
}

fn bad_request(message: &str) -> Response {
    json_response(
        StatusCode::BAD_REQUEST,
        &json!({"ok": false, "error": message}),
    )
}

pub async fn winners_mutate(
    Extension(pool): Extension<PgPool>,
    Json(body): Json<WinnerAction>,
) -> Response {
    match body.action.trim() {
        "delete" => delete_winner(&pool, &body).await,
        "setMeta" => set_month_meta(&pool, &body).await,
        _ => add_winner(&pool, &body).await,
    }
}

async fn add_winner(pool: &PgPool, body: &WinnerAction) -> Response {
    let draw_date = body.draw_date.trim();
    if !is_real_iso_date(draw_date) {
        return bad_request("drawDate must be a real YYYY-MM-DD date");
    }
    let raffle_key = &draw_date[0..7];

    let ticket = match body.ticket {
        Some(n) if (1..=i64::from(i32::MAX)).contains(&n) => n as i32,
        _ => return bad_request("ticketNumber must be a positive number"),
    };

    let name = body.name.trim();
    let town = body.town.trim();
    if name.chars().count() < 2 || town.chars().count() < 2 {
        return bad_request("name and town are required");
    }
    let prize = {
        let trimmed = body.prize.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    };

    let id = sanitize_id(&format!("{raffle_key}-{draw_date}-{ticket}"));

    let query = r"
        INSERT INTO raffle_winners (id, raffle_key, draw_date, ticket, name, town, prize)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE
        SET draw_date = EXCLUDED.draw_date, ticket = EXCLUDED.ticket,
            name = EXCLUDED.name, town = EXCLUDED.town, prize = EXCLUDED.prize
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(&id)
        .bind(raffle_key)
        .bind(draw_date)
        .bind(ticket)
        .bind(name)
        .bind(town)
        .bind(&prize)
        .execute(pool)
        .instrument(span)
        .await;

    match result {
        Ok(_) => {
            info!(%id, %raffle_key, "raffle winner recorded");
            match winners_for(pool, raffle_key).await {
                Ok(winners) => {
                    json_response(StatusCode::OK, &json!({"ok": true, "winners": winners}))
                }
                Err(err) => {
                    error!("winner list failed: {err}");
                    json_response(StatusCode::OK, &json!({"ok": true}))
                }
            }
        }
        Err(err) => {
            error!("winner upsert failed: {err}");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"ok": false, "error": "server"}),
            )
        }
    }
}

async fn delete_winner(pool: &PgPool, body: &WinnerAction) -> Response {
    let id = body.id.trim();
    if id.is_empty() {
        return bad_request("id is required");
    }

    let query = "DELETE FROM raffle_winners WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    match sqlx::query(query).bind(id).execute(pool).instrument(span).await {
        Ok(_) => json_response(StatusCode::OK, &json!({"ok": true})),
        Err(err) => {
            error!("winner delete failed: {err}");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"ok": false, "error": "server"}),
            )
        }
    }
}

async fn set_month_meta(pool: &PgPool, body: &WinnerAction) -> Response {
    let month_key = body.month_key.trim();
    if !is_month_key(month_key) {
        return bad_request("monthKey must look like YYYY-MM");
    }
    let title = body.title.trim();

    let query = r"
        INSERT INTO raffle_months (month_key, title)
        VALUES ($1, $2)
        ON CONFLICT (month_key) DO UPDATE SET title = EXCLUDED.title
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    match sqlx::query(query)
        .bind(month_key)
        .bind(title)
        .execute(pool)
        .instrument(span)
        .await
    {
        Ok(_) => json_response(StatusCode::OK, &json!({"ok": true})),
        Err(err) => {
            error!("month meta upsert failed: {err}");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"ok": false, "error": "server"}),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    #[serde(default)]
    month: String,
}

pub async fn month(Extension(pool): Extension<PgPool>, Query(query): Query<MonthQuery>) -> Response {
    let body = async {
        let months_query = r"
            SELECT DISTINCT raffle_key FROM raffle_winners ORDER BY raffle_key DESC
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = months_query
        );
        let active: Vec<String> = sqlx::query(months_query)
            .fetch_all(&pool)
            .instrument(span)
            .await
            .context("failed to list raffle months")?
            .into_iter()
            .map(|row| row.get("raffle_key"))
            .filter(|key: &String| is_month_key(key))
            .collect();

        let current = current_month_key();
        let (month, prev, next) = resolve_month(query.month.trim(), &active, &current);

        let winners = winners_for(&pool, &month).await?;

        let meta_query = "SELECT title FROM raffle_months WHERE month_key = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = meta_query
        );
        let title: Option<String> = sqlx::query(meta_query)
            .bind(&month)
            .fetch_optional(&pool)
            .instrument(span)
            .await
            .context("failed to read month meta")?
            .and_then(|row| row.get("title"));

        Ok::<serde_json::Value, anyhow::Error>(json!({
            "ok": true,
            "monthKey": month,
            "monthLabel": month_key_label(&month),
            "monthTitle": title,
            "prevMonthKey": prev,
            "nextMonthKey": next,
            "winners": winners,
        }))
    }
    .await;

    match body {
        Ok(response) => json_response(StatusCode::OK, &response),
        Err(err) => {
            error!("raffle month feed failed: {err}");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"ok": false, "error": "server"}),
            )
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LiveConfig {
    #[serde(default)]
    latest_video_url: Option<String>,
    #[serde(default)]
    previous_video_url: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

async fn load_live(kv: &Kv) -> LiveConfig {
    kv.get(LIVE_KV_KEY)
        .await
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

/// Turn whatever Facebook URL a volunteer pastes into the canonical page
/// video URL the embed widget accepts. Returns `None` when no video id can
/// be found or the host is not Facebook.
#[must_use]
pub fn normalize_facebook_video_url(raw: &str) -> Option<String> {
    static VIDEO_ID: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = VIDEO_ID
        .get_or_init(|| Regex::new(r"(?:/videos/|[?&]v=)(\d{6,20})").ok())
        .as_ref()?;

    let parsed = url::Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    if !matches!(
        host.as_str(),
        "facebook.com" | "www.facebook.com" | "m.facebook.com" | "web.facebook.com"
    ) {
        return None;
    }

    let haystack = parsed.as_str();
    let video_id = pattern.captures(haystack)?.get(1)?.as_str();
    Some(format!(
        "https://www.facebook.com/{FACEBOOK_PAGE_ID}/videos/{video_id}/"
    ))
}

pub async fn live_get(Extension(kv): Extension<Arc<Kv>>) -> Response {
    let config = load_live(&kv).await;
    json_response(StatusCode::OK, &json!({"ok": true, "config": config}))
}

#[derive(Debug, Deserialize)]
pub struct LiveUpdate {
    #[serde(default)]
    url: String,
}

pub async fn live_set(Extension(kv): Extension<Arc<Kv>>, Json(body): Json<LiveUpdate>) -> Response {
    let mut config = load_live(&kv).await;

    // An empty url takes the livestream link down; "previous" keeps
    // whatever it already held.
    if body.url.trim().is_empty() {
        config.latest_video_url = None;
    } else {
        let Some(normalized) = normalize_facebook_video_url(&body.url) else {
            return bad_request(
                "Could not find a video id in that URL. Paste a facebook.com link \
                 containing /videos/<id> or watch?v=<id>.",
            );
        };
        if config.latest_video_url.as_deref() != Some(normalized.as_str()) {
            config.previous_video_url = config.latest_video_url.take();
        }
        config.latest_video_url = Some(normalized);
    }
    config.updated_at = Some(Utc::now().to_rfc3339());

    match serde_json::to_string(&config) {
        Ok(raw) => {
            kv.put(LIVE_KV_KEY, &raw, None).await;
            info!("raffle livestream link updated");
            json_response(StatusCode::OK, &json!({"ok": true, "config": config}))
        }
        Err(err) => {
            error!("live config serialize failed: {err}");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"ok": false, "error": "server"}),
            )
        }
    }
}
