//! Admin login and logout.
//!
//! Single fixed admin identity checked against configured credentials; no
//! user table. Failed attempts feed an IP-scoped counter so a burst of bad
//! passwords locks the flow for ten minutes, and the lockout is
//! indistinguishable from a wrong password on the outside.

use axum::{
    http::{header, HeaderMap},
    response::Response,
    Extension, Form,
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, warn};

use crate::api::config::AppConfig;
use crate::api::handlers::redirect;
use crate::api::session::{
    self, clear_legacy_cookie, clear_session_cookie, client_ip, cookie_value, login_fail_key,
    session_cookie, LOGIN_FAIL_LIMIT, LOGIN_FAIL_WINDOW_SECONDS, SESSION_COOKIE_NAME,
};
use crate::kv::{Kv, ThrottleDecision};

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    next: String,
}

fn login_error_redirect(next: &str) -> Response {
    let encoded: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
    let mut response = redirect(&format!("/admin/login?err=1&next={encoded}"));
    append_cookie(&mut response, &clear_legacy_cookie());
    response
}

fn append_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = header::HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

pub async fn login(
    headers: HeaderMap,
    Extension(kv): Extension<Arc<Kv>>,
    Extension(config): Extension<Arc<AppConfig>>,
    Form(form): Form<LoginForm>,
) -> Response {
    let username = form.username.trim();
    let password = form.password.trim();
    let next = form.next.trim();
    let next = if next.is_empty() { "/admin" } else { next };

    if !config.admin_login_configured() {
        error!("admin login attempted without configured credentials");
        return redirect("/admin/login?err=server");
    }

    let ip = client_ip(&headers);
    let fail_key = login_fail_key(&ip);

    // A limited window answers exactly like bad credentials: same redirect,
    // same error flag, no hint that a counter exists.
    let throttled = matches!(
        kv.hit(&fail_key, LOGIN_FAIL_LIMIT, LOGIN_FAIL_WINDOW_SECONDS)
            .await,
        ThrottleDecision::Limited { .. }
    );

    let credentials_ok = username == config.admin_username
        && password == config.admin_password.expose_secret();

    if throttled || !credentials_ok {
        if throttled {
            warn!("login throttled for {ip}");
        }
        return login_error_redirect(next);
    }

    kv.delete(&fail_key).await;

    let token = match session::create_session(&kv).await {
        Ok(token) => token,
        Err(err) => {
            error!("failed to mint admin session: {err}");
            return redirect("/admin/login?err=server");
        }
    };

    let safe_next = if next.starts_with("/admin") { next } else { "/admin" };
    let mut response = redirect(safe_next);
    append_cookie(&mut response, &session_cookie(&token));
    append_cookie(&mut response, &clear_legacy_cookie());
    response
}

pub async fn logout(headers: HeaderMap, Extension(kv): Extension<Arc<Kv>>) -> Response {
    if let Some(token) = cookie_value(&headers, SESSION_COOKIE_NAME) {
        // Best effort: the cookies are cleared regardless.
        session::delete_session(&kv, &token).await;
    }

    let mut response = redirect("/admin/login");
    append_cookie(&mut response, &clear_session_cookie());
    append_cookie(&mut response, &clear_legacy_cookie());
    response
}
