pub mod contact;
pub mod donors;
pub mod events;
pub mod health;
pub mod login;
pub mod photos;
pub mod raffle;
pub mod sitemap;

// common response plumbing for the handlers

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Baseline headers every handler response carries.
pub fn stamp_security_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
}

/// 303 See Other with a query-string result flag, the response shape all
/// form posts share.
pub fn redirect(location: &str) -> Response {
    let mut response = match HeaderValue::from_str(location) {
        Ok(value) => {
            let mut response = StatusCode::SEE_OTHER.into_response();
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    stamp_security_headers(&mut response);
    response
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    let mut response = match serde_json::to_string(body) {
        Ok(serialized) => Response::builder()
            .status(status)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json; charset=utf-8"),
            )
            .body(Body::from(serialized))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    stamp_security_headers(&mut response);
    response
}

/// Does the caller prefer JSON over a redirect?
#[must_use]
pub fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}

/// 204 preflight response for the public form endpoints.
#[must_use]
pub fn preflight() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("POST,OPTIONS"),
    );
    headers.insert(
        header::HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("content-type"),
    );
    stamp_security_headers(&mut response);
    response
}

pub fn plain(status: StatusCode, message: &'static str) -> Response {
    let mut response = (status, message).into_response();
    stamp_security_headers(&mut response);
    response
}

/// Empty form fields become `None`.
#[must_use]
pub fn optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[must_use]
pub fn allowed_image_type(content_type: &str) -> bool {
    matches!(
        content_type,
        "image/jpeg" | "image/png" | "image/webp" | "image/gif"
    )
}

#[must_use]
pub fn ext_from_content_type(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

pub const MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_sets_location_and_security_headers() {
        let response = redirect("/admin/donors?ok=1");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/admin/donors?ok=1"
        );
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        assert_eq!(
            response.headers().get(header::X_FRAME_OPTIONS).unwrap(),
            "DENY"
        );
    }

    #[test]
    fn wants_json_reads_accept() {
        let mut headers = HeaderMap::new();
        assert!(!wants_json(&headers));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        assert!(!wants_json(&headers));
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/plain"),
        );
        assert!(wants_json(&headers));
    }

    #[test]
    fn optional_trims_to_none() {
        assert_eq!(optional("  "), None);
        assert_eq!(optional(" x "), Some("x".to_string()));
    }

    #[test]
    fn image_types_whitelist() {
        assert!(allowed_image_type("image/jpeg"));
        assert!(allowed_image_type("image/webp"));
        assert!(!allowed_image_type("image/svg+xml"));
        assert!(!allowed_image_type("application/pdf"));
        assert_eq!(ext_from_content_type("image/png"), "png");
        assert_eq!(ext_from_content_type("text/plain"), "bin");
    }
}
