//! Outbound transactional email via the Resend API.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::info;

const RESEND_URL: &str = "https://api.resend.com/emails";

#[derive(Debug)]
pub struct Mailer {
    client: Client,
    api_key: SecretString,
    from_email: String,
    to_email: String,
}

/// Escape user text for inclusion in the notification HTML body.
#[must_use]
pub fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

impl Mailer {
    #[must_use]
    pub fn new(client: Client, api_key: SecretString, from_email: String, to_email: String) -> Self {
        Self {
            client,
            api_key,
            from_email,
            to_email,
        }
    }

    /// Deliver one contact-form submission to the configured recipient.
    pub async fn send_contact(&self, name: &str, reply_to: &str, message: &str) -> Result<()> {
        if self.api_key.expose_secret().is_empty()
            || self.from_email.is_empty()
            || self.to_email.is_empty()
        {
            bail!("email delivery is not configured");
        }

        let html = format!(
            "<h2>Friends of Lake Henry</h2>\
             <p><strong>Name:</strong> {}</p>\
             <p><strong>Email:</strong> {}</p>\
             <p><strong>Message:</strong><br>{}</p>\
             <hr><p>Sent: {}</p>",
            escape_html(name),
            escape_html(reply_to),
            escape_html(message).replace('\n', "<br>"),
            Utc::now().to_rfc3339(),
        );

        let body = json!({
            "from": self.from_email,
            "to": [self.to_email],
            "subject": format!("Inquiry from {name}"),
            "html": html,
            "reply_to": reply_to,
        });

        let response = self
            .client
            .post(RESEND_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("failed to reach email provider")?;

        if !response.status().is_success() {
            bail!("email provider returned {}", response.status());
        }

        info!("contact email delivered for {name}");
        Ok(())
    }
}
