//! Sitemap for the public pages, rooted at the configured base URL.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use std::sync::Arc;

use crate::api::config::AppConfig;

const PUBLIC_PATHS: [&str; 7] = [
    "/",
    "/about",
    "/events",
    "/raffle",
    "/photos",
    "/donate",
    "/contact",
];

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn render(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let mut body = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );
    for path in PUBLIC_PATHS {
        body.push_str("  <url><loc>");
        body.push_str(&escape_xml(&format!("{base}{path}")));
        body.push_str("</loc></url>\n");
    }
    body.push_str("</urlset>\n");
    body
}

pub async fn handler(Extension(config): Extension<Arc<AppConfig>>) -> Response {
    let mut response = (StatusCode::OK, render(&config.base_url)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_every_public_path_once() {
        let xml = render("https://lakehenry.org/");
        for path in PUBLIC_PATHS {
            assert!(xml.contains(&format!("<loc>https://lakehenry.org{path}</loc>")));
        }
        assert_eq!(xml.matches("<url>").count(), PUBLIC_PATHS.len());
        assert!(!xml.contains("lakehenry.org//"));
    }

    #[test]
    fn escapes_reserved_characters() {
        let xml = render("https://lakehenry.org/?a=1&b=2");
        assert!(xml.contains("&amp;b=2"));
        assert!(!xml.contains("?a=1&b"));
    }
}
