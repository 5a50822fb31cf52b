//! Server-side admin sessions.
//!
//! A successful login mints an opaque 256-bit token; the KV store holds the
//! matching record under `admin_sess:<token>` with an 8 hour TTL. The token
//! itself is the only thing the client keeps. This supersedes the retired
//! `admin_auth` signed-timestamp cookie, which every auth redirect and
//! logout still clears so stale credentials cannot be replayed.

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::kv::Kv;

pub const SESSION_COOKIE_NAME: &str = "admin_session";
pub const LEGACY_COOKIE_NAME: &str = "admin_auth";

const SESSION_KEY_PREFIX: &str = "admin_sess:";
pub const SESSION_TTL_SECONDS: u64 = 8 * 60 * 60;

pub const LOGIN_FAIL_KEY_PREFIX: &str = "admin_login_fail:";
pub const LOGIN_FAIL_LIMIT: u32 = 10;
pub const LOGIN_FAIL_WINDOW_SECONDS: u64 = 10 * 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub role: String,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Session verification outcome, shared by the gate and the handlers.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthState {
    Authenticated { role: String },
    Unauthenticated { reason: &'static str },
}

impl AuthState {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Authenticated { role } if role == "admin")
    }
}

/// Create a new session token for the auth cookie. The raw value is only
/// returned to set the cookie; the KV store keys the record by it.
pub fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

fn session_key(token: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{token}")
}

/// Store a fresh admin session record and return its cookie value.
pub async fn create_session(kv: &Kv) -> Result<String> {
    let token = generate_session_token()?;
    let now = Utc::now().timestamp();
    let record = SessionRecord {
        role: "admin".to_string(),
        created_at: now,
        expires_at: now + SESSION_TTL_SECONDS as i64,
    };
    let raw = serde_json::to_string(&record).context("failed to serialize session record")?;
    kv.put(
        &session_key(&token),
        &raw,
        Some(Duration::from_secs(SESSION_TTL_SECONDS)),
    )
    .await;
    Ok(token)
}

/// Best-effort removal of the session record behind a cookie value.
pub async fn delete_session(kv: &Kv, token: &str) {
    kv.delete(&session_key(token)).await;
}

/// Resolve the request headers into an auth state: cookie present, record
/// present, record parses, role is admin, and the expiry has not passed.
/// Every failure collapses into an opaque reason; callers never learn which
/// check failed beyond their own logging.
pub async fn verify_session(headers: &HeaderMap, kv: &Kv) -> AuthState {
    let Some(token) = cookie_value(headers, SESSION_COOKIE_NAME) else {
        return AuthState::Unauthenticated { reason: "no-cookie" };
    };

    let Some(raw) = kv.get(&session_key(&token)).await else {
        return AuthState::Unauthenticated { reason: "no-record" };
    };

    let Ok(record) = serde_json::from_str::<SessionRecord>(&raw) else {
        return AuthState::Unauthenticated { reason: "malformed" };
    };

    if record.role != "admin" {
        return AuthState::Unauthenticated { reason: "role" };
    }

    if record.expires_at <= Utc::now().timestamp() {
        return AuthState::Unauthenticated { reason: "expired" };
    }

    AuthState::Authenticated { role: record.role }
}

/// Extract one cookie value from a `Cookie` header.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name {
            return Some(val.to_string());
        }
    }
    None
}

/// `Set-Cookie` value installing the session token.
#[must_use]
pub fn session_cookie(token: &str) -> String {
    format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age={SESSION_TTL_SECONDS}"
    )
}

/// `Set-Cookie` value removing the session cookie.
#[must_use]
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age=0")
}

/// `Set-Cookie` value removing the retired signed cookie.
#[must_use]
pub fn clear_legacy_cookie() -> String {
    format!("{LEGACY_COOKIE_NAME}=; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0")
}

#[must_use]
pub fn login_fail_key(ip: &str) -> String {
    format!("{LOGIN_FAIL_KEY_PREFIX}{ip}")
}

/// Client IP for the login-failure counter: CDN header first, then proxy
/// headers, then a fixed placeholder so counting still works locally.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> String {
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    from_header("cf-connecting-ip")
        .or_else(|| from_header("x-forwarded-for"))
        .or_else(|| from_header("x-real-ip"))
        .unwrap_or_else(|| "unknown".to_string())
}
