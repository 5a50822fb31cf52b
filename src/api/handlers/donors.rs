//! Donor ledger back-office endpoints.

use anyhow::{Context, Result};
use axum::{response::Response, Extension, Form};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, Instrument};

use crate::api::handlers::{optional, redirect};

/// Parse a human-entered dollar amount into cents.
///
/// Accepts `50`, `50.0`, `50.00`, `$50.00`, `1,234.56`. Rejects anything
/// non-positive, over one million dollars, or with stray characters.
#[must_use]
pub fn parse_amount_cents(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();

    let (dollars, cents) = match cleaned.split_once('.') {
        Some((_, fraction)) if fraction.is_empty() || fraction.len() > 2 => return None,
        Some((dollars, cents)) => (dollars, cents),
        None => (cleaned.as_str(), ""),
    };

    if dollars.is_empty() || !dollars.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !cents.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let dollars: i64 = dollars.parse().ok()?;
    let cents: i64 = if cents.is_empty() {
        0
    } else if cents.len() == 1 {
        cents.parse::<i64>().ok()? * 10
    } else {
        cents.parse().ok()?
    };

    let total = dollars.checked_mul(100)?.checked_add(cents)?;
    if total < 1 || total > 100_000_000 {
        return None;
    }
    Some(total)
}

#[derive(Debug, Deserialize)]
pub struct CreateDonorForm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    amount: String,
    #[serde(default, rename = "displayName")]
    display_name: String,
    #[serde(default, rename = "inMemoryOf")]
    in_memory_of: String,
}

async fn insert_donor(
    pool: &PgPool,
    name: &str,
    amount_cents: i64,
    display_name: Option<&str>,
    in_memory_of: Option<&str>,
) -> Result<()> {
    let query = r"
        INSERT INTO donors (name, amount_cents, display_name, in_memory_of, source)
        VALUES ($1, $2, $3, $4, 'admin')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(name)
        .bind(amount_cents)
        .bind(display_name)
        .bind(in_memory_of)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert donor")?;
    Ok(())
}

pub async fn create(Extension(pool): Extension<PgPool>, Form(form): Form<CreateDonorForm>) -> Response {
    let name = form.name.trim();
    if name.chars().count() < 2 {
        return redirect("/admin/donors?err=name");
    }

    let Some(amount_cents) = parse_amount_cents(&form.amount) else {
        return redirect("/admin/donors?err=amount");
    };

    match insert_donor(
        &pool,
        name,
        amount_cents,
        optional(&form.display_name).as_deref(),
        optional(&form.in_memory_of).as_deref(),
    )
    .await
    {
        Ok(()) => redirect("/admin/donors?ok=1"),
        Err(err) => {
            error!("donor insert failed: {err}");
            redirect("/admin/donors?err=server")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteDonorForm {
    #[serde(default)]
    id: String,
}

pub async fn delete(Extension(pool): Extension<PgPool>, Form(form): Form<DeleteDonorForm>) -> Response {
    let Ok(id) = form.id.trim().parse::<i64>() else {
        return redirect("/admin/donors?err=input");
    };
    if id <= 0 {
        return redirect("/admin/donors?err=input");
    }

    let query = "DELETE FROM donors WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    match sqlx::query(query).bind(id).execute(&pool).instrument(span).await {
        Ok(_) => redirect("/admin/donors?ok=deleted"),
        Err(err) => {
            error!("donor delete failed: {err}");
            redirect("/admin/donors?err=server")
        }
    }
}
