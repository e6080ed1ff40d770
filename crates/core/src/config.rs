use chrono::Duration;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthError;
use crate::state::DEFAULT_EXPIRY_MARGIN_SECS;

const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_TOKEN_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v4/token";
const DEFAULT_USERINFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const DEFAULT_CLIENT_ID: &str =
    "511828570984-fuprh0cm7665emlne3rnf9pk34kkn86s.apps.googleusercontent.com";
const DEFAULT_REDIRECT_URI: &str = "com.google.codelabs.appauth:/oauth2callback";

/// Registered client and provider endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub scopes: Vec<String>,
    pub expiry_margin_secs: i64,
    pub pending_ttl_secs: i64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: None,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            userinfo_endpoint: DEFAULT_USERINFO_ENDPOINT.to_string(),
            scopes: vec!["profile".to_string()],
            expiry_margin_secs: DEFAULT_EXPIRY_MARGIN_SECS,
            pending_ttl_secs: 600,
            connect_timeout_secs: 5,
            request_timeout_secs: 20,
        }
    }
}

impl AuthConfig {
    /// Points every endpoint at `base` (`/authorize`, `/token`, `/userinfo`).
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.authorization_endpoint = format!("{base}/authorize");
        self.token_endpoint = format!("{base}/token");
        self.userinfo_endpoint = format!("{base}/userinfo");
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Config("client_id is empty".into()));
        }
        for (name, value) in [
            ("redirect_uri", &self.redirect_uri),
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("userinfo_endpoint", &self.userinfo_endpoint),
        ] {
            Url::parse(value).map_err(|e| AuthError::Config(format!("{name}: {e}")))?;
        }
        Ok(())
    }

    pub fn authorization_url(&self) -> Result<Url, AuthError> {
        Url::parse(&self.authorization_endpoint)
            .map_err(|e| AuthError::Config(format!("authorization_endpoint: {e}")))
    }

    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    pub fn expiry_margin(&self) -> Duration {
        Duration::seconds(self.expiry_margin_secs.max(0))
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::seconds(self.pending_ttl_secs)
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
