use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::state::{ErrorDetail, TokenResponse};

/// Token endpoint of the OAuth provider.
#[async_trait]
pub trait AuthorizationServer: Send + Sync {
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    fn failure(self, detail: ErrorDetail) -> AuthError {
        match self {
            Grant::AuthorizationCode => AuthError::ExchangeFailed(detail),
            Grant::RefreshToken => AuthError::RefreshFailed(detail),
        }
    }
}

pub struct HttpAuthorizationServer {
    http: Client,
    token_endpoint: String,
    client_id: String,
    client_secret: Option<String>,
}

impl HttpAuthorizationServer {
    pub fn new(config: &AuthConfig) -> Self {
        let http = Client::builder()
            .user_agent(concat!("appauth/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            token_endpoint: config.token_endpoint.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    async fn token_request(
        &self,
        grant: Grant,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, AuthError> {
        let mut form = params.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        if let Some(ref secret) = self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http
            .post(&self.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let oauth_error = serde_json::from_str::<ErrorDetail>(&body)
                .ok()
                .filter(|detail| !detail.error.is_empty());
            let detail = match (oauth_error, grant) {
                (Some(detail), _) => detail,
                // Only an OAuth error object speaks to the refresh token itself.
                (None, Grant::RefreshToken) => {
                    warn!(status = status.as_u16(), "Token endpoint unavailable during refresh");
                    return Err(AuthError::Transport(format!(
                        "token endpoint returned {status}"
                    )));
                }
                (None, Grant::AuthorizationCode) => status_detail(status.as_u16(), &body),
            };
            warn!(?grant, status = status.as_u16(), error = %detail.error, "Token request rejected");
            return Err(grant.failure(detail));
        }

        debug!(?grant, "Token request succeeded");
        serde_json::from_str::<TokenResponse>(&body).map_err(|e| match grant {
            Grant::AuthorizationCode => grant.failure(
                ErrorDetail::new("invalid_token_response").with_description(e.to_string()),
            ),
            Grant::RefreshToken => {
                warn!("Unreadable token response during refresh: {}", e);
                AuthError::Transport(format!("unreadable token response: {e}"))
            }
        })
    }
}

#[async_trait]
impl AuthorizationServer for HttpAuthorizationServer {
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.token_request(
            Grant::AuthorizationCode,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("code_verifier", code_verifier),
            ],
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        self.token_request(
            Grant::RefreshToken,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }
}

/// Error detail for a response body that is not an OAuth error object.
fn status_detail(status: u16, body: &str) -> ErrorDetail {
    let detail = ErrorDetail::new(format!("http_{status}"));
    let snippet: String = body.chars().take(200).collect();
    if snippet.trim().is_empty() {
        detail
    } else {
        detail.with_description(snippet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn server_for(base: &str) -> HttpAuthorizationServer {
        HttpAuthorizationServer::new(&AuthConfig::default().with_base_url(base).with_client_id("cid"))
    }

    #[tokio::test]
    async fn exchange_posts_code_grant() {
        let mut mock_server = Server::new_async().await;
        let mock = mock_server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "c1".into()),
                Matcher::UrlEncoded("code_verifier".into(), "v1".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("redirect_uri".into(), "app:/cb".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"a1","refresh_token":"r1","id_token":"i1","expires_in":3600,"token_type":"Bearer"}"#,
            )
            .create_async()
            .await;

        let response = server_for(&mock_server.url())
            .exchange_code("c1", "v1", "app:/cb")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.access_token, "a1");
        assert_eq!(response.refresh_token.as_deref(), Some("r1"));
        assert_eq!(response.expires_in, Some(3600));
    }

    #[tokio::test]
    async fn refresh_error_body_maps_to_refresh_failed() {
        let mut mock_server = Server::new_async().await;
        mock_server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Token has been revoked."}"#)
            .create_async()
            .await;

        let err = server_for(&mock_server.url()).refresh("r1").await.unwrap_err();
        assert_eq!(
            err,
            AuthError::RefreshFailed(
                ErrorDetail::new("invalid_grant").with_description("Token has been revoked.")
            )
        );
    }

    #[tokio::test]
    async fn exchange_non_json_error_keeps_status() {
        let mut mock_server = Server::new_async().await;
        mock_server
            .mock("POST", "/token")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let err = server_for(&mock_server.url())
            .exchange_code("c1", "v1", "app:/cb")
            .await
            .unwrap_err();
        match err {
            AuthError::ExchangeFailed(detail) => {
                assert_eq!(detail.error, "http_502");
                assert_eq!(detail.error_description.as_deref(), Some("bad gateway"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_during_outage_is_a_transport_error() {
        let mut mock_server = Server::new_async().await;
        mock_server
            .mock("POST", "/token")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let err = server_for(&mock_server.url()).refresh("r1").await.unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
    }

    #[tokio::test]
    async fn rate_limited_refresh_is_a_transport_error() {
        let mut mock_server = Server::new_async().await;
        mock_server
            .mock("POST", "/token")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let err = server_for(&mock_server.url()).refresh("r1").await.unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
    }

    #[tokio::test]
    async fn html_refresh_response_is_a_transport_error() {
        let mut mock_server = Server::new_async().await;
        mock_server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html>captive portal</html>")
            .create_async()
            .await;

        let err = server_for(&mock_server.url()).refresh("r1").await.unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let err = server_for("http://127.0.0.1:1").refresh("r1").await.unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
    }
}
