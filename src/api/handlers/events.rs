//! Event calendar: back-office CRUD plus the public month feed and poster
//! image endpoint.
//!
//! Event ids are human-readable slugs derived from the start date and
//! title (`2026-03-14-community-meeting`), with a numeric suffix on
//! collision. Start/end times are Chicago wall-clock `datetime-local`
//! strings stored verbatim; the normalizer only backs the scheduling
//! validation so month bucketing stays a lexical substring.

use anyhow::{Context, Result};
use axum::{
    extract::{Multipart, Query},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Form,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{error, Instrument};
use url::Url;

use crate::api::datetime::{current_month_key, is_month_key, local_to_utc, month_key_label};
use crate::api::handlers::{
    allowed_image_type, ext_from_content_type, json_response, optional, plain, redirect,
    stamp_security_headers, MAX_UPLOAD_BYTES,
};
use crate::objects::ObjectStore;

/// Lowercased, quote-stripped, dash-separated title slug, capped at 80
/// characters.
#[must_use]
pub fn slugify(input: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in input.trim().chars() {
        if matches!(c, '\'' | '"') {
            continue;
        }
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug.truncate(80);
    slug.trim_matches('-').to_string()
}

/// `YYYY-MM-DD` prefix of a `datetime-local` value.
#[must_use]
pub fn date_prefix(value: &str) -> Option<&str> {
    let prefix = value.get(0..10)?;
    let bytes = prefix.as_bytes();
    if value.as_bytes().get(10) == Some(&b'T')
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| matches!(i, 4 | 7) || b.is_ascii_digit())
    {
        Some(prefix)
    } else {
        None
    }
}

/// Probe `base`, then `base-2` .. `base-30`, then fall back to a
/// timestamp suffix.
async fn generate_id(pool: &PgPool, base: &str) -> Result<String> {
    let query = "SELECT 1 FROM events WHERE id = $1";
    let mut id = base.to_string();
    for n in 2..=30 {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let exists = sqlx::query(query)
            .bind(&id)
            .fetch_optional(pool)
            .instrument(span)
            .await
            .context("failed to probe event id")?;
        if exists.is_none() {
            return Ok(id);
        }
        id = format!("{base}-{n}");
    }
    Ok(format!("{base}-{}", Utc::now().timestamp_millis()))
}

#[derive(Debug, Deserialize)]
pub struct EventForm {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    is_tbd: Option<String>,
    #[serde(default)]
    date_start: String,
    #[serde(default)]
    date_end: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    url_label: String,
}

#[derive(Debug)]
struct EventFields {
    title: String,
    kind: String,
    status: String,
    is_tbd: bool,
    date_start: Option<String>,
    date_end: Option<String>,
    location: Option<String>,
    summary: Option<String>,
    url: Option<String>,
    url_label: Option<String>,
}

/// Validate the shared create/update fields. The strictest revision of the
/// form rules applies: http(s)-only links, a real convertible start time
/// that is not already in the past, and an end no earlier than the start.
fn validate(form: &EventForm) -> std::result::Result<EventFields, &'static str> {
    let title = form.title.trim().to_string();
    let kind = form.kind.trim().to_string();
    if title.is_empty() || kind.is_empty() {
        return Err("invalid");
    }

    let status = if form.status.trim() == "published" {
        "published"
    } else {
        "draft"
    };

    let is_tbd = form.is_tbd.is_some();
    let date_start = optional(&form.date_start);
    let date_end = optional(&form.date_end);

    let (date_start, date_end) = if is_tbd {
        (None, None)
    } else {
        let Some(start_raw) = date_start else {
            return Err("invalid");
        };
        let Some(start_utc) = local_to_utc(&start_raw) else {
            return Err("invalid");
        };
        if start_utc < Utc::now() {
            return Err("past");
        }
        let date_end = match date_end {
            Some(end_raw) => {
                let Some(end_utc) = local_to_utc(&end_raw) else {
                    return Err("invalid");
                };
                if end_utc < start_utc {
                    return Err("invalid");
                }
                Some(end_raw)
            }
            None => None,
        };
        (Some(start_raw), date_end)
    };

    let url = match optional(&form.url) {
        Some(raw) => {
            let parsed = Url::parse(&raw).map_err(|_| "url")?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err("url");
            }
            Some(raw)
        }
        None => None,
    };

    Ok(EventFields {
        title,
        kind,
        status: status.to_string(),
        is_tbd,
        date_start,
        date_end,
        location: optional(&form.location),
        summary: optional(&form.summary),
        url,
        url_label: optional(&form.url_label),
    })
}

fn encode_id(id: &str) -> String {
    url::form_urlencoded::byte_serialize(id.as_bytes()).collect()
}

pub async fn create(Extension(pool): Extension<PgPool>, Form(form): Form<EventForm>) -> Response {
    let fields = match validate(&form) {
        Ok(fields) => fields,
        Err(code) => return redirect(&format!("/admin/events/new?err={code}")),
    };

    let prefix = fields
        .date_start
        .as_deref()
        .and_then(date_prefix)
        .unwrap_or("tbd");
    let base = format!("{prefix}-{}", slugify(&fields.title));

    let inserted = async {
        let id = generate_id(&pool, &base).await?;
        let query = r"
            INSERT INTO events (
                id, title, kind, status,
                date_start, date_end, is_tbd,
                location, summary, url, url_label
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&id)
            .bind(&fields.title)
            .bind(&fields.kind)
            .bind(&fields.status)
            .bind(&fields.date_start)
            .bind(&fields.date_end)
            .bind(fields.is_tbd)
            .bind(&fields.location)
            .bind(&fields.summary)
            .bind(&fields.url)
            .bind(&fields.url_label)
            .execute(&pool)
            .instrument(span)
            .await
            .context("failed to insert event")?;
        Ok::<String, anyhow::Error>(id)
    }
    .await;

    match inserted {
        Ok(id) => redirect(&format!("/admin/events/{}?ok=updated", encode_id(&id))),
        Err(err) => {
            error!("event create failed: {err}");
            redirect("/admin/events/new?err=server")
        }
    }
}

pub async fn update(Extension(pool): Extension<PgPool>, Form(form): Form<EventForm>) -> Response {
    let id = form.id.trim().to_string();
    if id.is_empty() {
        return redirect("/admin/events?err=notfound");
    }

    let fields = match validate(&form) {
        Ok(fields) => fields,
        Err(code) => return redirect(&format!("/admin/events/{}?err={code}", encode_id(&id))),
    };

    let query = r"
        UPDATE events SET
            title = $1, kind = $2, status = $3,
            date_start = $4, date_end = $5, is_tbd = $6,
            location = $7, summary = $8, url = $9, url_label = $10,
            updated_at = now()
        WHERE id = $11
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(&fields.title)
        .bind(&fields.kind)
        .bind(&fields.status)
        .bind(&fields.date_start)
        .bind(&fields.date_end)
        .bind(fields.is_tbd)
        .bind(&fields.location)
        .bind(&fields.summary)
        .bind(&fields.url)
        .bind(&fields.url_label)
        .bind(&id)
        .execute(&pool)
        .instrument(span)
        .await;

    match result {
        Ok(done) if done.rows_affected() == 1 => {
            redirect(&format!("/admin/events/{}?ok=updated", encode_id(&id)))
        }
        Ok(_) => redirect("/admin/events?err=notfound"),
        Err(err) => {
            error!("event update failed: {err}");
            redirect("/admin/events?err=server")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EventIdForm {
    #[serde(default)]
    id: String,
    #[serde(default)]
    next: String,
}

pub async fn delete(Extension(pool): Extension<PgPool>, Form(form): Form<EventIdForm>) -> Response {
    let id = form.id.trim();
    if id.is_empty() {
        return redirect("/admin/events?err=notfound");
    }

    let query = "DELETE FROM events WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    match sqlx::query(query).bind(id).execute(&pool).instrument(span).await {
        Ok(done) if done.rows_affected() >= 1 => redirect("/admin/events?ok=deleted"),
        Ok(_) => redirect("/admin/events?err=notfound"),
        Err(err) => {
            error!("event delete failed: {err}");
            redirect("/admin/events?err=server")
        }
    }
}

pub async fn toggle_status(
    Extension(pool): Extension<PgPool>,
    Form(form): Form<EventIdForm>,
) -> Response {
    let id = form.id.trim();
    if id.is_empty() {
        return redirect("/admin/events?err=notfound");
    }
    let status = if form.next.trim() == "published" {
        "published"
    } else {
        "draft"
    };

    let query = "UPDATE events SET status = $1, updated_at = now() WHERE id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    match sqlx::query(query)
        .bind(status)
        .bind(id)
        .execute(&pool)
        .instrument(span)
        .await
    {
        Ok(done) if done.rows_affected() == 1 => redirect("/admin/events?ok=toggled"),
        Ok(_) => redirect("/admin/events?err=notfound"),
        Err(err) => {
            error!("event toggle failed: {err}");
            redirect("/admin/events?err=server")
        }
    }
}

pub async fn poster(
    Extension(pool): Extension<PgPool>,
    Extension(objects): Extension<Arc<ObjectStore>>,
    mut multipart: Multipart,
) -> Response {
    let mut id = String::new();
    let mut alt = String::new();
    let mut file: Option<(String, Vec<u8>)> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().unwrap_or_default().to_string();
                match name.as_str() {
                    "id" => id = field.text().await.unwrap_or_default().trim().to_string(),
                    "alt" => alt = field.text().await.unwrap_or_default().trim().to_string(),
                    "poster" => {
                        let content_type = field.content_type().unwrap_or_default().to_string();
                        match field.bytes().await {
                            Ok(bytes) => file = Some((content_type, bytes.to_vec())),
                            Err(err) => {
                                error!("poster upload read failed: {err}");
                                return redirect("/admin/events?err=server");
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(None) => break,
            Err(err) => {
                error!("poster multipart parse failed: {err}");
                return redirect("/admin/events?err=server");
            }
        }
    }

    if id.is_empty() {
        return redirect("/admin/events?err=invalid");
    }
    let back = format!("/admin/events/{}", encode_id(&id));
    if alt.chars().count() < 5 {
        return redirect(&format!("{back}?err=alt"));
    }
    let Some((content_type, bytes)) = file else {
        return redirect(&format!("{back}?err=file"));
    };
    if !allowed_image_type(&content_type) {
        return redirect(&format!("{back}?err=type"));
    }
    if bytes.is_empty() || bytes.len() > MAX_UPLOAD_BYTES {
        return redirect(&format!("{back}?err=size"));
    }

    let existing = {
        let query = "SELECT poster_key FROM events WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&id)
            .fetch_optional(&pool)
            .instrument(span)
            .await
    };
    let old_key: Option<String> = match existing {
        Ok(Some(row)) => row.get("poster_key"),
        Ok(None) => return redirect("/admin/events?err=notfound"),
        Err(err) => {
            error!("poster lookup failed: {err}");
            return redirect(&format!("{back}?err=server"));
        }
    };

    let key = format!("events/posters/{id}.{}", ext_from_content_type(&content_type));
    let staged = match objects.put_staged(&key, &bytes, &content_type).await {
        Ok(staged) => staged,
        Err(err) => {
            error!("poster object write failed: {err}");
            return redirect(&format!("{back}?err=server"));
        }
    };

    let query = "UPDATE events SET poster_key = $1, poster_alt = $2, updated_at = now() WHERE id = $3";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let updated = sqlx::query(query)
        .bind(&key)
        .bind(&alt)
        .bind(&id)
        .execute(&pool)
        .instrument(span)
        .await;

    match updated {
        Ok(done) if done.rows_affected() == 1 => {
            staged.keep();
            // Replaced posters with a different extension leave an old
            // object behind; clean it up best effort.
            if let Some(old) = old_key.filter(|old| old != &key) {
                if let Err(err) = objects.delete(&old).await {
                    error!("old poster cleanup failed: {err}");
                }
            }
            redirect(&format!("{back}?ok=poster"))
        }
        Ok(_) => {
            staged.discard().await;
            redirect("/admin/events?err=notfound")
        }
        Err(err) => {
            error!("poster row update failed: {err}");
            staged.discard().await;
            redirect(&format!("{back}?err=server"))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    #[serde(default)]
    month: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct EventRow {
    id: String,
    title: String,
    kind: String,
    status: String,
    date_start: Option<String>,
    date_end: Option<String>,
    is_tbd: bool,
    location: Option<String>,
    summary: Option<String>,
    url: Option<String>,
    url_label: Option<String>,
    poster_key: Option<String>,
    poster_alt: Option<String>,
}

#[derive(Debug, Serialize)]
struct MonthResponse {
    ok: bool,
    #[serde(rename = "monthKey")]
    month_key: String,
    #[serde(rename = "monthLabel")]
    month_label: String,
    #[serde(rename = "prevMonthKey")]
    prev_month_key: Option<String>,
    #[serde(rename = "nextMonthKey")]
    next_month_key: Option<String>,
    #[serde(rename = "monthEvents")]
    month_events: Vec<EventRow>,
}

fn month_bounds(month_key: &str) -> Option<(String, String)> {
    let (year, month) = month_key.split_once('-')?;
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    Some((
        format!("{month_key}-01"),
        format!("{next_year:04}-{next_month:02}-01"),
    ))
}

/// Months that can appear in the public calendar dropdown: every month
/// with published dated events, plus the current Chicago month.
async fn active_months(pool: &PgPool) -> Result<Vec<String>> {
    let query = r"
        SELECT DISTINCT substr(date_start, 1, 7) AS month_key
        FROM events
        WHERE status = 'published'
          AND is_tbd = FALSE
          AND date_start IS NOT NULL
          AND date_start <> ''
        ORDER BY month_key DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list event months")?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.get::<Option<String>, _>("month_key"))
        .filter(|key| is_month_key(key))
        .collect())
}

/// Shared month-navigation math: merge active months with the current
/// month, pick the landing month, and derive prev/next keys (months are
/// sorted descending).
pub(super) fn resolve_month(
    requested: &str,
    active: &[String],
    current: &str,
) -> (String, Option<String>, Option<String>) {
    let mut months: Vec<String> = Vec::with_capacity(active.len() + 1);
    months.push(current.to_string());
    months.extend(active.iter().cloned());
    months.sort_by(|a, b| b.cmp(a));
    months.dedup();

    let default_month = active
        .iter()
        .max()
        .cloned()
        .unwrap_or_else(|| current.to_string());

    let mut month = if is_month_key(requested) && months.iter().any(|m| m == requested) {
        requested.to_string()
    } else {
        default_month
    };
    if !months.iter().any(|m| m == &month) {
        month = months.first().cloned().unwrap_or_else(|| current.to_string());
    }

    let idx = months.iter().position(|m| m == &month).unwrap_or(0);
    let prev = months.get(idx + 1).cloned();
    let next = if idx > 0 { months.get(idx - 1).cloned() } else { None };
    (month, prev, next)
}

pub async fn month(
    Extension(pool): Extension<PgPool>,
    Query(query): Query<MonthQuery>,
) -> Response {
    let body = async {
        let active = active_months(&pool).await?;
        let current = current_month_key();
        let (month, prev, next) = resolve_month(query.month.trim(), &active, &current);

        let Some((start, end)) = month_bounds(&month) else {
            anyhow::bail!("unresolvable month key {month}");
        };

        let select = r"
            SELECT id, title, kind, status, date_start, date_end, is_tbd,
                   location, summary, url, url_label, poster_key, poster_alt
            FROM events
            WHERE status = 'published'
              AND is_tbd = FALSE
              AND date_start IS NOT NULL
              AND date_start <> ''
              AND date_start >= $1
              AND date_start < $2
            ORDER BY date_start ASC, title ASC
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = select
        );
        let month_events = sqlx::query_as::<_, EventRow>(select)
            .bind(&start)
            .bind(&end)
            .fetch_all(&pool)
            .instrument(span)
            .await
            .context("failed to list month events")?;

        Ok::<MonthResponse, anyhow::Error>(MonthResponse {
            ok: true,
            month_label: month_key_label(&month),
            month_key: month,
            prev_month_key: prev,
            next_month_key: next,
            month_events,
        })
    }
    .await;

    match body {
        Ok(response) => json_response(StatusCode::OK, &response),
        Err(err) => {
            error!("event month feed failed: {err}");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &serde_json::json!({"ok": false, "error": "server"}),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    #[serde(default)]
    pub id: String,
}

/// Public poster image for a published event.
pub async fn poster_file(
    Extension(pool): Extension<PgPool>,
    Extension(objects): Extension<Arc<ObjectStore>>,
    Query(query): Query<IdQuery>,
) -> Response {
    let id = query.id.trim();
    if id.is_empty() {
        return plain(StatusCode::BAD_REQUEST, "Missing id");
    }

    let lookup = {
        let query_text = "SELECT poster_key FROM events WHERE id = $1 AND status = 'published'";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query_text
        );
        sqlx::query(query_text)
            .bind(id)
            .fetch_optional(&pool)
            .instrument(span)
            .await
    };

    let key: Option<String> = match lookup {
        Ok(row) => row.and_then(|row| row.get("poster_key")),
        Err(err) => {
            error!("poster lookup failed: {err}");
            return plain(StatusCode::INTERNAL_SERVER_ERROR, "Server error");
        }
    };
    let Some(key) = key else {
        return plain(StatusCode::NOT_FOUND, "Not found");
    };

    match objects.get(&key).await {
        Ok(Some((bytes, content_type))) => {
            let mut response = bytes.into_response();
            stamp_security_headers(&mut response);
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=86400"),
            );
            response
        }
        Ok(None) => plain(StatusCode::NOT_FOUND, "Not found"),
        Err(err) => {
            error!("poster read failed: {err}");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
        }
    }
}
