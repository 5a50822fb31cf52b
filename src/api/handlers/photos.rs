//! Community photo queue: public submissions land as `pending/` objects
//! plus a `pending` row, moderation either promotes them to `approved/`
//! or removes them.
//!
//! Approval re-keys the object with a compensating delete: copy the
//! pending object first, then flip the row only while it is still
//! pending, and roll the copy back if the row moved underneath us. The
//! original upload is never deleted before the row flip lands.

use axum::{
    extract::{Multipart, Query},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Form,
};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use crate::api::handlers::{
    allowed_image_type, ext_from_content_type, optional, plain, redirect,
    stamp_security_headers, MAX_UPLOAD_BYTES,
};
use crate::objects::ObjectStore;

const CATEGORIES: [&str; 5] = [
    "Restoration",
    "Donations",
    "Community Events",
    "Raffles",
    "Scenery",
];

pub async fn submit(
    Extension(pool): Extension<PgPool>,
    Extension(objects): Extension<Arc<ObjectStore>>,
    mut multipart: Multipart,
) -> Response {
    let mut category = String::new();
    let mut alt = String::new();
    let mut title = String::new();
    let mut caption = String::new();
    let mut submitted_by = String::new();
    let mut honeypot = String::new();
    let mut file: Option<(String, Vec<u8>)> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().unwrap_or_default().to_string();
                match name.as_str() {
                    "category" => {
                        category = field.text().await.unwrap_or_default().trim().to_string();
                    }
                    "alt" => alt = field.text().await.unwrap_or_default().trim().to_string(),
                    "title" => title = field.text().await.unwrap_or_default(),
                    "caption" => caption = field.text().await.unwrap_or_default(),
                    "submittedBy" => submitted_by = field.text().await.unwrap_or_default(),
                    "website" => honeypot = field.text().await.unwrap_or_default(),
                    "photo" => {
                        let content_type = field.content_type().unwrap_or_default().to_string();
                        match field.bytes().await {
                            Ok(bytes) => file = Some((content_type, bytes.to_vec())),
                            Err(err) => {
                                error!("photo upload read failed: {err}");
                                return redirect("/photos?err=server");
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(None) => break,
            Err(err) => {
                error!("photo multipart parse failed: {err}");
                return redirect("/photos?err=server");
            }
        }
    }

    // Bots fill hidden fields; answer as if the upload worked.
    if !honeypot.trim().is_empty() {
        info!("photo submission honeypot tripped");
        return redirect("/photos?submitted=1");
    }

    if !CATEGORIES.contains(&category.as_str()) {
        return redirect("/photos?err=category");
    }
    if alt.chars().count() < 5 {
        return redirect("/photos?err=alt");
    }
    let Some((content_type, bytes)) = file else {
        return redirect("/photos?err=file");
    };
    if !allowed_image_type(&content_type) {
        return redirect("/photos?err=type");
    }
    if bytes.is_empty() || bytes.len() > MAX_UPLOAD_BYTES {
        return redirect("/photos?err=size");
    }

    let id = Uuid::new_v4();
    let key = format!("pending/{id}.{}", ext_from_content_type(&content_type));
    let staged = match objects.put_staged(&key, &bytes, &content_type).await {
        Ok(staged) => staged,
        Err(err) => {
            error!("photo object write failed: {err}");
            return redirect("/photos?err=server");
        }
    };

    let query = r"
        INSERT INTO photos
            (id, object_key, content_type, category, alt, title, caption, submitted_by, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let inserted = sqlx::query(query)
        .bind(id)
        .bind(&key)
        .bind(&content_type)
        .bind(&category)
        .bind(&alt)
        .bind(optional(&title))
        .bind(optional(&caption))
        .bind(optional(&submitted_by))
        .execute(&pool)
        .instrument(span)
        .await;

    match inserted {
        Ok(_) => {
            staged.keep();
            info!(%id, %category, "photo submitted for review");
            redirect("/photos?submitted=1")
        }
        Err(err) => {
            error!("photo row insert failed: {err}");
            staged.discard().await;
            redirect("/photos?err=server")
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct ModerationForm {
    #[serde(default)]
    id: String,
    #[serde(default)]
    alt: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    caption: String,
}

fn parse_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim()).ok()
}

async fn fetch_photo(
    pool: &PgPool,
    id: Uuid,
    status: &str,
) -> Result<Option<String>, sqlx::Error> {
    let query = "SELECT object_key FROM photos WHERE id = $1 AND status = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .bind(status)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(row.map(|row| row.get("object_key")))
}

pub async fn approve(
    Extension(pool): Extension<PgPool>,
    Extension(objects): Extension<Arc<ObjectStore>>,
    Form(form): Form<ModerationForm>,
) -> Response {
    let Some(id) = parse_id(&form.id) else {
        return redirect("/admin/photos?err=input");
    };
    let alt = form.alt.trim();
    if alt.chars().count() < 5 {
        return redirect("/admin/photos?err=alt");
    }

    let old_key = match fetch_photo(&pool, id, "pending").await {
        Ok(Some(key)) => key,
        Ok(None) => return redirect("/admin/photos?err=notfound"),
        Err(err) => {
            error!("photo lookup failed: {err}");
            return redirect("/admin/photos?err=server");
        }
    };

    commit_approval(&pool, &objects, id, &old_key, alt, &form.title, &form.caption).await
}

/// Re-keys the object and flips the row, compensating when the row has
/// already moved by the time the update runs.
async fn commit_approval(
    pool: &PgPool,
    objects: &ObjectStore,
    id: Uuid,
    old_key: &str,
    alt: &str,
    title: &str,
    caption: &str,
) -> Response {
    let new_key = match old_key.strip_prefix("pending/") {
        Some(rest) => format!("approved/{rest}"),
        None => {
            error!(%id, key = %old_key, "pending photo with non-pending key");
            return redirect("/admin/photos?err=server");
        }
    };

    let staged = match objects.copy_staged(old_key, &new_key).await {
        Ok(staged) => staged,
        Err(err) => {
            error!("photo copy failed: {err}");
            return redirect("/admin/photos?err=server");
        }
    };

    let query = r"
        UPDATE photos
        SET status = 'approved', object_key = $1, alt = $2,
            title = $3, caption = $4, approved_at = now()
        WHERE id = $5 AND status = 'pending'
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let updated = sqlx::query(query)
        .bind(&new_key)
        .bind(alt)
        .bind(optional(title))
        .bind(optional(caption))
        .bind(id)
        .execute(pool)
        .instrument(span)
        .await;

    match updated {
        Ok(done) if done.rows_affected() == 1 => {
            staged.keep();
            if let Err(err) = objects.delete(old_key).await {
                error!("pending photo cleanup failed: {err}");
            }
            info!(%id, "photo approved");
            redirect("/admin/photos?ok=approved")
        }
        Ok(_) => {
            // Lost the race with another moderator; the pending object is
            // untouched.
            staged.discard().await;
            plain(StatusCode::CONFLICT, "Photo already moderated")
        }
        Err(err) => {
            error!("photo approve failed: {err}");
            staged.discard().await;
            redirect("/admin/photos?err=server")
        }
    }
}

async fn remove(
    pool: &PgPool,
    objects: &ObjectStore,
    id: Uuid,
    status: &'static str,
    ok_flag: &'static str,
) -> Response {
    let key = match fetch_photo(pool, id, status).await {
        Ok(Some(key)) => key,
        Ok(None) => return redirect("/admin/photos?err=notfound"),
        Err(err) => {
            error!("photo lookup failed: {err}");
            return redirect("/admin/photos?err=server");
        }
    };

    if let Err(err) = objects.delete(&key).await {
        error!("photo object delete failed: {err}");
    }

    let query = "DELETE FROM photos WHERE id = $1 AND status = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    match sqlx::query(query)
        .bind(id)
        .bind(status)
        .execute(pool)
        .instrument(span)
        .await
    {
        Ok(done) if done.rows_affected() >= 1 => {
            info!(%id, "photo removed ({status})");
            redirect(&format!("/admin/photos?ok={ok_flag}"))
        }
        Ok(_) => redirect("/admin/photos?err=notfound"),
        Err(err) => {
            error!("photo row delete failed: {err}");
            redirect("/admin/photos?err=server")
        }
    }
}

pub async fn reject(
    Extension(pool): Extension<PgPool>,
    Extension(objects): Extension<Arc<ObjectStore>>,
    Form(form): Form<ModerationForm>,
) -> Response {
    let Some(id) = parse_id(&form.id) else {
        return redirect("/admin/photos?err=input");
    };
    remove(&pool, &objects, id, "pending", "rejected").await
}

pub async fn delete(
    Extension(pool): Extension<PgPool>,
    Extension(objects): Extension<Arc<ObjectStore>>,
    Form(form): Form<ModerationForm>,
) -> Response {
    let Some(id) = parse_id(&form.id) else {
        return redirect("/admin/photos?err=input");
    };
    remove(&pool, &objects, id, "approved", "deleted").await
}

#[derive(Debug, serde::Deserialize)]
pub struct FileQuery {
    #[serde(default)]
    id: String,
}

async fn serve_file(
    pool: &PgPool,
    objects: &ObjectStore,
    raw_id: &str,
    status: &'static str,
    cache_control: &'static str,
) -> Response {
    let Some(id) = parse_id(raw_id) else {
        return plain(StatusCode::BAD_REQUEST, "Missing id");
    };

    let key = match fetch_photo(pool, id, status).await {
        Ok(Some(key)) => key,
        Ok(None) => return plain(StatusCode::NOT_FOUND, "Not found"),
        Err(err) => {
            error!("photo lookup failed: {err}");
            return plain(StatusCode::INTERNAL_SERVER_ERROR, "Server error");
        }
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
                HeaderValue::from_static(cache_control),
            );
            response
        }
        Ok(None) => plain(StatusCode::NOT_FOUND, "Not found"),
        Err(err) => {
            error!("photo read failed: {err}");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
        }
    }
}

/// Public gallery image, approved photos only.
pub async fn approved_file(
    Extension(pool): Extension<PgPool>,
    Extension(objects): Extension<Arc<ObjectStore>>,
    Query(query): Query<FileQuery>,
) -> Response {
    serve_file(&pool, &objects, &query.id, "approved", "public, max-age=3600").await
}

/// Moderation preview, pending photos only. Behind the admin gate, never
/// cached.
pub async fn pending_file(
    Extension(pool): Extension<PgPool>,
    Extension(objects): Extension<Arc<ObjectStore>>,
    Query(query): Query<FileQuery>,
) -> Response {
    serve_file(&pool, &objects, &query.id, "pending", "no-store").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_match_the_submission_form() {
        assert!(CATEGORIES.contains(&"Community Events"));
        assert!(CATEGORIES.contains(&"Scenery"));
        assert!(!CATEGORIES.contains(&"community events"));
        assert!(!CATEGORIES.contains(&""));
    }

    #[test]
    fn parse_id_requires_a_uuid() {
        assert!(parse_id("c1a7e2a0-0000-4000-8000-000000000000").is_some());
        assert!(parse_id(" c1a7e2a0-0000-4000-8000-000000000000 ").is_some());
        assert!(parse_id("42").is_none());
        assert!(parse_id("").is_none());
    }

    // Needs a reachable Postgres; set LAKEHENRY_TEST_DSN to run.
    #[tokio::test]
    async fn approval_backs_out_when_the_row_already_moved() {
        let Ok(dsn) = std::env::var("LAKEHENRY_TEST_DSN") else {
            return;
        };
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&dsn)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let objects = ObjectStore::open(dir.path()).await.unwrap();

        let id = Uuid::new_v4();
        let old_key = format!("pending/{id}.jpg");
        objects
            .put(&old_key, b"jpeg bytes", "image/jpeg")
            .await
            .unwrap();

        // Another moderator got there first.
        sqlx::query(
            "INSERT INTO photos (id, object_key, content_type, category, alt, status)
             VALUES ($1, $2, 'image/jpeg', 'Scenery', 'a lake view', 'approved')",
        )
        .bind(id)
        .bind(&old_key)
        .execute(&pool)
        .await
        .unwrap();

        let response = commit_approval(&pool, &objects, id, &old_key, "a lake view", "", "").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // The original object survives and the copy is gone.
        assert!(objects.exists(&old_key).await.unwrap());
        let new_key = format!("approved/{id}.jpg");
        assert!(!objects.exists(&new_key).await.unwrap());

        sqlx::query("DELETE FROM photos WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await
            .unwrap();
    }
}
