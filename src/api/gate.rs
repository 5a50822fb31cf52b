//! Request interception for the administrative surface.
//!
//! Every request passes through here. Public paths go straight through;
//! `/admin` (back-office UI) and `/api/admin` (back-office API) require a
//! valid server-side session, and mutating admin API calls additionally
//! require a same-origin `Origin` or `Referer` header. Admin responses are
//! stamped with no-store and anti-indexing headers on the way out.

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::api::session::{self, AuthState};
use crate::kv::Kv;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathClass {
    Public,
    AdminUi,
    AdminApi,
}

#[must_use]
pub fn classify(path: &str) -> PathClass {
    if path == "/api/admin" || path.starts_with("/api/admin/") {
        PathClass::AdminApi
    } else if path == "/admin" || path.starts_with("/admin/") {
        PathClass::AdminUi
    } else {
        PathClass::Public
    }
}

/// Login and logout endpoints skip the session check; everything else under
/// the admin surface requires one.
#[must_use]
pub fn is_auth_endpoint(path: &str) -> bool {
    matches!(
        path,
        "/admin/login"
            | "/admin/login/"
            | "/api/admin/login"
            | "/admin/logout"
            | "/api/admin/logout"
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OriginCheck {
    SameOrigin,
    CrossOrigin,
    /// Neither `Origin` nor `Referer` present: fail closed.
    Absent,
}

/// Same-origin check for mutating admin API calls, based on the request
/// `Host` authority.
#[must_use]
pub fn check_origin(headers: &HeaderMap) -> OriginCheck {
    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return OriginCheck::Absent;
    };

    let header_authority = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Url::parse(value).ok())
            .and_then(|url| {
                let authority = match url.port() {
                    Some(port) => format!("{}:{port}", url.host_str()?),
                    None => url.host_str()?.to_string(),
                };
                Some(authority)
            })
    };

    let origin = header_authority(header::ORIGIN);
    let referer = header_authority(header::REFERER);

    match (origin, referer) {
        (None, None) => OriginCheck::Absent,
        (Some(authority), _) | (None, Some(authority)) => {
            if authority.eq_ignore_ascii_case(host) {
                OriginCheck::SameOrigin
            } else {
                OriginCheck::CrossOrigin
            }
        }
    }
}

fn is_mutation(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Headers every gated response carries: browsers and crawlers must treat
/// the back office as uncacheable and unindexable.
fn stamp_admin_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        header::HeaderName::from_static("x-robots-tag"),
        HeaderValue::from_static("noindex, nofollow"),
    );
}

fn unauthorized() -> Response {
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    stamp_admin_headers(&mut response);
    response
}

fn forbidden() -> Response {
    let mut response = StatusCode::FORBIDDEN.into_response();
    stamp_admin_headers(&mut response);
    response
}

/// 302 to the login page, preserving the originally requested path so a
/// successful login can resume it. Requests already aimed at the login page
/// fall back to `/admin` so the redirect can never loop. The legacy signed
/// cookie is cleared on the way.
#[must_use]
pub fn redirect_to_login(next_path: &str) -> Response {
    let safe_next = if next_path.starts_with("/admin/login") {
        "/admin"
    } else {
        next_path
    };
    let encoded: String = url::form_urlencoded::byte_serialize(safe_next.as_bytes()).collect();
    let location = format!("/admin/login?err=auth&next={encoded}");

    let mut response = Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .header(header::SET_COOKIE, session::clear_legacy_cookie())
        .body(axum::body::Body::empty())
        .unwrap_or_else(|_| StatusCode::FOUND.into_response());
    stamp_admin_headers(&mut response);
    response
}

pub async fn gate(Extension(kv): Extension<Arc<Kv>>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let class = classify(&path);

    if class == PathClass::Public {
        return next.run(request).await;
    }

    // Cross-site form posts and fetches against the admin API fail closed
    // before any session work happens.
    if class == PathClass::AdminApi && is_mutation(request.method()) {
        match check_origin(request.headers()) {
            OriginCheck::SameOrigin => {}
            check => {
                debug!("admin api origin check failed: {check:?} on {path}");
                return forbidden();
            }
        }
    }

    if !is_auth_endpoint(&path) {
        let state = session::verify_session(request.headers(), &kv).await;
        if !state.is_admin() {
            if let AuthState::Unauthenticated { reason } = &state {
                debug!("unauthenticated admin request to {path}: {reason}");
            }
            return match class {
                PathClass::AdminApi => unauthorized(),
                _ => {
                    let next_path = match request.uri().query() {
                        Some(query) => format!("{path}?{query}"),
                        None => path,
                    };
                    redirect_to_login(&next_path)
                }
            };
        }
    }

    let mut response = next.run(request).await;
    stamp_admin_headers(&mut response);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_splits_admin_surfaces() {
        assert_eq!(classify("/"), PathClass::Public);
        assert_eq!(classify("/photos/submit"), PathClass::Public);
        assert_eq!(classify("/administrator"), PathClass::Public);
        assert_eq!(classify("/admin"), PathClass::AdminUi);
        assert_eq!(classify("/admin/donors"), PathClass::AdminUi);
        assert_eq!(classify("/api/admin/login"), PathClass::AdminApi);
        assert_eq!(classify("/api/admin/photos/approve"), PathClass::AdminApi);
        assert_eq!(classify("/api/contact"), PathClass::Public);
    }

    #[test]
    fn auth_endpoints_are_exempt() {
        assert!(is_auth_endpoint("/admin/login"));
        assert!(is_auth_endpoint("/admin/login/"));
        assert!(is_auth_endpoint("/api/admin/logout"));
        assert!(!is_auth_endpoint("/admin/donors"));
        assert!(!is_auth_endpoint("/api/admin/donors"));
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn origin_check_fails_closed_when_absent() {
        let h = headers(&[("host", "lakehenry.org")]);
        assert_eq!(check_origin(&h), OriginCheck::Absent);
    }

    #[test]
    fn origin_check_matches_origin_header() {
        let h = headers(&[("host", "lakehenry.org"), ("origin", "https://lakehenry.org")]);
        assert_eq!(check_origin(&h), OriginCheck::SameOrigin);

        let h = headers(&[("host", "lakehenry.org"), ("origin", "https://evil.example")]);
        assert_eq!(check_origin(&h), OriginCheck::CrossOrigin);
    }

    #[test]
    fn origin_check_falls_back_to_referer() {
        let h = headers(&[
            ("host", "lakehenry.org"),
            ("referer", "https://lakehenry.org/admin/donors"),
        ]);
        assert_eq!(check_origin(&h), OriginCheck::SameOrigin);

        let h = headers(&[
            ("host", "lakehenry.org"),
            ("referer", "https://evil.example/admin"),
        ]);
        assert_eq!(check_origin(&h), OriginCheck::CrossOrigin);
    }

    #[test]
    fn origin_check_honors_non_default_ports() {
        let h = headers(&[
            ("host", "localhost:8080"),
            ("origin", "http://localhost:8080"),
        ]);
        assert_eq!(check_origin(&h), OriginCheck::SameOrigin);

        let h = headers(&[("host", "localhost:8080"), ("origin", "http://localhost:9090")]);
        assert_eq!(check_origin(&h), OriginCheck::CrossOrigin);
    }

    #[test]
    fn login_redirect_preserves_next_and_avoids_loops() {
        let response = redirect_to_login("/admin/donors?ok=1");
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers().get(header::LOCATION).unwrap();
        assert_eq!(
            location.to_str().unwrap(),
            "/admin/login?err=auth&next=%2Fadmin%2Fdonors%3Fok%3D1"
        );

        let response = redirect_to_login("/admin/login");
        let location = response.headers().get(header::LOCATION).unwrap();
        assert_eq!(
            location.to_str().unwrap(),
            "/admin/login?err=auth&next=%2Fadmin"
        );
    }

    #[test]
    fn login_redirect_clears_legacy_cookie() {
        let response = redirect_to_login("/admin");
        let cookie = response.headers().get(header::SET_COOKIE).unwrap();
        assert!(cookie.to_str().unwrap().starts_with("admin_auth=;"));
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
    }
}
