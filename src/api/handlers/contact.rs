//! Public contact form: CAPTCHA-gated relay from the website to the
//! organization mailbox.

use axum::{
    extract::{FromRequest, Multipart, Request},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Extension,
};
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

use crate::api::captcha::CaptchaVerifier;
use crate::api::email::Mailer;
use crate::api::handlers::{json_response, preflight, redirect, wants_json};
use crate::api::session::client_ip;

const MAX_FORM_BYTES: usize = 64 * 1024;

#[derive(Debug, Default)]
struct ContactFields {
    name: String,
    email: String,
    message: String,
    honeypot: String,
    captcha_token: String,
}

impl ContactFields {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "name" => self.name = value,
            "email" => self.email = value,
            "message" => self.message = value,
            "company" => self.honeypot = value,
            "cf-turnstile-response" => self.captcha_token = value,
            _ => {}
        }
    }
}

fn is_plausible_email(value: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(value))
}

enum Outcome {
    Sent,
    Input,
    Captcha,
    Server,
}

fn respond(headers: &HeaderMap, outcome: &Outcome) -> Response {
    if wants_json(headers) {
        match outcome {
            Outcome::Sent => json_response(StatusCode::OK, &json!({"ok": true})),
            Outcome::Input => json_response(
                StatusCode::BAD_REQUEST,
                &json!({"ok": false, "error": "input"}),
            ),
            Outcome::Captcha => json_response(
                StatusCode::BAD_REQUEST,
                &json!({"ok": false, "error": "captcha"}),
            ),
            Outcome::Server => json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"ok": false, "error": "server"}),
            ),
        }
    } else {
        match outcome {
            Outcome::Sent => redirect("/contact?sent=1"),
            Outcome::Input => redirect("/contact?err=input"),
            Outcome::Captcha => redirect("/contact?err=captcha"),
            Outcome::Server => redirect("/contact?err=server"),
        }
    }
}

/// Parse either encoding the form can arrive in. Anything else is a
/// malformed submission, not a server error.
async fn read_fields(headers: &HeaderMap, request: Request) -> Option<ContactFields> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let mut fields = ContactFields::default();
    if content_type.starts_with("application/x-www-form-urlencoded") {
        let bytes = axum::body::to_bytes(request.into_body(), MAX_FORM_BYTES)
            .await
            .ok()?;
        for (name, value) in url::form_urlencoded::parse(&bytes) {
            fields.set(&name, value.into_owned());
        }
        Some(fields)
    } else if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &()).await.ok()?;
        while let Some(field) = multipart.next_field().await.ok()? {
            let name = field.name().unwrap_or_default().to_string();
            let value = field.text().await.ok()?;
            fields.set(&name, value);
        }
        Some(fields)
    } else {
        None
    }
}

pub async fn submit(
    Extension(captcha): Extension<Arc<CaptchaVerifier>>,
    Extension(mailer): Extension<Arc<Mailer>>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    let Some(fields) = read_fields(&headers, request).await else {
        return respond(&headers, &Outcome::Input);
    };

    // Bots fill hidden fields; answer as if the message went through.
    if !fields.honeypot.trim().is_empty() {
        info!("contact honeypot tripped");
        return respond(&headers, &Outcome::Sent);
    }

    let name = fields.name.trim();
    let email = fields.email.trim();
    let message = fields.message.trim();
    if name.chars().count() < 2 || !is_plausible_email(email) || message.chars().count() < 10 {
        return respond(&headers, &Outcome::Input);
    }

    let token = fields.captcha_token.trim();
    if token.is_empty() || !captcha.verify(token, &client_ip(&headers)).await {
        return respond(&headers, &Outcome::Captcha);
    }

    match mailer.send_contact(name, email, message).await {
        Ok(()) => {
            info!("contact message relayed");
            respond(&headers, &Outcome::Sent)
        }
        Err(err) => {
            error!("contact email failed: {err}");
            respond(&headers, &Outcome::Server)
        }
    }
}

pub async fn options() -> Response {
    preflight()
}
