use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::session::AuthSession;

/// Subset of the OpenID Connect userinfo claims shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub sub: Option<String>,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
    pub email: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.given_name.as_deref())
            .or(self.email.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInfoOutcome {
    Profile(UserProfile),
    /// The provider answered with an OAuth error object.
    Rejected {
        error: String,
        description: Option<String>,
    },
}

impl UserInfoOutcome {
    pub fn message(&self) -> String {
        match self {
            UserInfoOutcome::Profile(_) => "Request complete".to_string(),
            UserInfoOutcome::Rejected { description, .. } => format!(
                "Request failed [{}]",
                description.as_deref().unwrap_or("No description")
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct UserInfoClient {
    http: Client,
    endpoint: String,
}

impl UserInfoClient {
    pub fn new(config: &AuthConfig) -> Self {
        let http = Client::builder()
            .user_agent(concat!("appauth/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            endpoint: config.userinfo_endpoint.clone(),
        }
    }

    /// Fetches the signed-in user's profile with a fresh access token.
    ///
    /// Session errors (no credentials, rejected refresh, pending
    /// restrictions) are returned as `Err`. Once a request has been sent,
    /// network and decoding failures are logged and yield `Ok(None)`.
    pub async fn fetch_profile(
        &self,
        session: &AuthSession,
    ) -> Result<Option<UserInfoOutcome>, AuthError> {
        session
            .with_fresh_token(|token| async move { self.request(&token).await })
            .await
    }

    async fn request(&self, access_token: &str) -> Option<UserInfoOutcome> {
        let response = match self
            .http
            .get(&self.endpoint)
            .bearer_auth(access_token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Userinfo request failed: {}", e);
                return None;
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read userinfo response: {}", e);
                return None;
            }
        };

        if let Ok(error) = serde_json::from_str::<ErrorBody>(&body) {
            warn!(status = status.as_u16(), error = %error.error, "Userinfo request rejected");
            return Some(UserInfoOutcome::Rejected {
                error: error.error,
                description: error.error_description,
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Some(UserInfoOutcome::Rejected {
                error: format!("http_{}", status.as_u16()),
                description: None,
            });
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), "Userinfo endpoint returned an error");
            return None;
        }

        match serde_json::from_str::<UserProfile>(&body) {
            Ok(profile) => {
                debug!("Userinfo request complete");
                Some(UserInfoOutcome::Profile(profile))
            }
            Err(e) => {
                warn!("Failed to parse userinfo response: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::HttpAuthorizationServer;
    use crate::state::AuthState;
    use crate::store::{MemoryStateStore, StateStore, AUTH_STATE_SLOT};
    use chrono::{Duration, Utc};
    use mockito::{Matcher, Server};
    use std::sync::Arc;

    fn session_for(base: &str, state: Option<AuthState>) -> (AuthSession, AuthConfig) {
        let config = AuthConfig::default().with_base_url(base);
        let store = Arc::new(MemoryStateStore::new());
        if let Some(state) = state {
            store.save(AUTH_STATE_SLOT, &state.to_json().unwrap()).unwrap();
        }
        let server = Arc::new(HttpAuthorizationServer::new(&config));
        let session = AuthSession::new(config.clone(), server, store);
        session.init();
        (session, config)
    }

    fn valid_state() -> AuthState {
        AuthState {
            access_token: Some("abc".into()),
            refresh_token: Some("r1".into()),
            token_expiry: Some(Utc::now() + Duration::hours(1)),
            ..AuthState::default()
        }
    }

    #[tokio::test]
    async fn fetches_profile_with_bearer_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/userinfo")
            .match_header("authorization", "Bearer abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"sub":"1","name":"Ada Lovelace","given_name":"Ada","family_name":"Lovelace","picture":"https://example.com/a.png"}"#,
            )
            .create_async()
            .await;

        let (session, config) = session_for(&server.url(), Some(valid_state()));
        let outcome = UserInfoClient::new(&config).fetch_profile(&session).await.unwrap();

        mock.assert_async().await;
        let profile = match outcome {
            Some(UserInfoOutcome::Profile(profile)) => profile,
            other => panic!("expected a profile, got {other:?}"),
        };
        assert_eq!(profile.display_name(), Some("Ada Lovelace"));
        assert_eq!(profile.family_name.as_deref(), Some("Lovelace"));
        assert_eq!(profile.picture.as_deref(), Some("https://example.com/a.png"));
    }

    #[tokio::test]
    async fn stale_token_is_refreshed_before_the_call() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(200)
            .with_body(r#"{"access_token":"xyz","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let userinfo = server
            .mock("GET", "/userinfo")
            .match_header("authorization", "Bearer xyz")
            .with_status(200)
            .with_body(r#"{"sub":"1","name":"Ada"}"#)
            .create_async()
            .await;

        let stale = AuthState {
            token_expiry: Some(Utc::now() - Duration::minutes(1)),
            ..valid_state()
        };
        let (session, config) = session_for(&server.url(), Some(stale));
        let outcome = UserInfoClient::new(&config).fetch_profile(&session).await.unwrap();

        refresh.assert_async().await;
        userinfo.assert_async().await;
        assert!(matches!(outcome, Some(UserInfoOutcome::Profile(_))));
    }

    async fn assert_refresh_outage_keeps_credentials(status: usize, body: &str) {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(status)
            .with_body(body)
            .create_async()
            .await;

        let config = AuthConfig::default().with_base_url(&server.url());
        let store = Arc::new(MemoryStateStore::new());
        let stale = AuthState {
            token_expiry: Some(Utc::now() - Duration::minutes(1)),
            ..valid_state()
        }
        .normalized();
        store.save(AUTH_STATE_SLOT, &stale.to_json().unwrap()).unwrap();
        let session = AuthSession::new(
            config.clone(),
            Arc::new(HttpAuthorizationServer::new(&config)),
            store.clone(),
        );
        session.init();

        let outcome = UserInfoClient::new(&config).fetch_profile(&session).await;

        refresh.assert_async().await;
        assert!(matches!(outcome, Err(AuthError::Transport(_))), "{outcome:?}");
        assert!(session.is_authorized());
        assert_eq!(session.current_state(), Some(stale.clone()));
        let persisted = AuthState::from_json(&store.load(AUTH_STATE_SLOT).unwrap().unwrap()).unwrap();
        assert_eq!(persisted, stale);
    }

    #[tokio::test]
    async fn rate_limited_refresh_keeps_credentials() {
        assert_refresh_outage_keeps_credentials(429, "Too Many Requests").await;
    }

    #[tokio::test]
    async fn captive_portal_refresh_keeps_credentials() {
        assert_refresh_outage_keeps_credentials(200, "<html>captive portal</html>").await;
    }

    #[tokio::test]
    async fn oauth_error_body_is_reported() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/userinfo")
            .with_status(401)
            .with_body(r#"{"error":"invalid_token","error_description":"Token expired"}"#)
            .create_async()
            .await;

        let (session, config) = session_for(&server.url(), Some(valid_state()));
        let outcome = UserInfoClient::new(&config)
            .fetch_profile(&session)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.message(), "Request failed [Token expired]");
    }

    #[tokio::test]
    async fn unparseable_profile_yields_nothing() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/userinfo")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let (session, config) = session_for(&server.url(), Some(valid_state()));
        let outcome = UserInfoClient::new(&config).fetch_profile(&session).await;

        assert_eq!(outcome, Ok(None));
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_nothing() {
        let (session, config) = session_for("http://127.0.0.1:1", Some(valid_state()));
        let outcome = UserInfoClient::new(&config).fetch_profile(&session).await;
        assert_eq!(outcome, Ok(None));
    }

    #[tokio::test]
    async fn signed_out_session_is_unauthenticated() {
        let (session, config) = session_for("http://127.0.0.1:1", None);
        let outcome = UserInfoClient::new(&config).fetch_profile(&session).await;
        assert_eq!(outcome, Err(AuthError::Unauthenticated));
    }

    #[test]
    fn rejected_message_without_description() {
        let outcome = UserInfoOutcome::Rejected {
            error: "invalid_request".into(),
            description: None,
        };
        assert_eq!(outcome.message(), "Request failed [No description]");
        assert_eq!(
            UserInfoOutcome::Profile(UserProfile::default()).message(),
            "Request complete"
        );
    }
}
