//! Runtime configuration, injected from the CLI/environment.

use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;

/// Everything the handlers need that is not a shared service handle.
/// Secrets stay wrapped until the single comparison or request that
/// needs them.
#[derive(Debug)]
pub struct AppConfig {
    pub base_url: String,
    pub data_dir: PathBuf,
    pub admin_username: String,
    pub admin_password: SecretString,
    /// Secret of the retired `admin_auth` signed cookie. Only used to make
    /// sure legacy cookies are cleared, never to authenticate.
    pub cookie_secret: SecretString,
    pub turnstile_secret: SecretString,
    pub resend_api_key: SecretString,
    pub from_email: String,
    pub to_email: String,
}

impl AppConfig {
    /// True when every secret the login flow depends on is non-empty.
    #[must_use]
    pub fn admin_login_configured(&self) -> bool {
        !self.admin_username.is_empty()
            && !self.admin_password.expose_secret().is_empty()
            && !self.cookie_secret.expose_secret().is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::AppConfig;
    use secrecy::SecretString;

    pub(crate) fn config() -> AppConfig {
        AppConfig {
            base_url: "http://localhost:8080".to_string(),
            data_dir: std::env::temp_dir(),
            admin_username: "admin".to_string(),
            admin_password: SecretString::from("hunter2"),
            cookie_secret: SecretString::from("legacy-secret"),
            turnstile_secret: SecretString::from("ts-secret"),
            resend_api_key: SecretString::from("re-key"),
            from_email: "site@friendsoflakehenry.org".to_string(),
            to_email: "board@friendsoflakehenry.org".to_string(),
        }
    }

    #[test]
    fn admin_login_configured_requires_all_secrets() {
        let mut cfg = config();
        assert!(cfg.admin_login_configured());

        cfg.admin_password = SecretString::from("");
        assert!(!cfg.admin_login_configured());
    }
}
