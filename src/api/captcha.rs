//! Turnstile challenge verification for the public forms.

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::error;

const SITEVERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

#[derive(Debug, Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

#[derive(Debug)]
pub struct CaptchaVerifier {
    client: Client,
    secret: SecretString,
}

impl CaptchaVerifier {
    #[must_use]
    pub fn new(client: Client, secret: SecretString) -> Self {
        Self { client, secret }
    }

    /// Verify a client-supplied challenge token. Any upstream problem is
    /// logged and treated as a failed challenge; the caller never retries.
    pub async fn verify(&self, token: &str, remote_ip: &str) -> bool {
        if self.secret.expose_secret().is_empty() || token.is_empty() {
            return false;
        }

        let mut form = vec![
            ("secret", self.secret.expose_secret().to_string()),
            ("response", token.to_string()),
        ];
        if !remote_ip.is_empty() && remote_ip != "unknown" {
            form.push(("remoteip", remote_ip.to_string()));
        }

        let response = match self.client.post(SITEVERIFY_URL).form(&form).send().await {
            Ok(response) => response,
            Err(err) => {
                error!("turnstile siteverify request failed: {err}");
                return false;
            }
        };

        if !response.status().is_success() {
            error!("turnstile siteverify returned {}", response.status());
            return false;
        }

        match response.json::<SiteverifyResponse>().await {
            Ok(body) => {
                if !body.success {
                    error!("turnstile rejected token: {:?}", body.error_codes);
                }
                body.success
            }
            Err(err) => {
                error!("turnstile siteverify body unreadable: {err}");
                false
            }
        }
    }
}
