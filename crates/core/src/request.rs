use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use url::Url;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::pkce;

/// How many consumed state markers are remembered for duplicate detection.
const CONSUMED_HISTORY: usize = 32;

/// One login attempt, ready to be opened in a browser.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRequest {
    pub authorization_endpoint: Url,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub response_type: &'static str,
    pub login_hint: Option<String>,
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
}

impl AuthorizationRequest {
    pub fn new(config: &AuthConfig, login_hint: Option<String>) -> Result<Self, AuthError> {
        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::code_challenge_s256(&code_verifier);
        Ok(Self {
            authorization_endpoint: config.authorization_url()?,
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope(),
            response_type: "code",
            login_hint: login_hint.filter(|hint| !hint.trim().is_empty()),
            state: pkce::generate_state(),
            code_verifier,
            code_challenge,
        })
    }

    pub fn url(&self) -> Url {
        let mut url = self.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", self.response_type)
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("scope", &self.scope)
                .append_pair("state", &self.state)
                .append_pair("code_challenge", &self.code_challenge)
                .append_pair("code_challenge_method", "S256");
            if let Some(ref hint) = self.login_hint {
                query.append_pair("login_hint", hint);
            }
        }
        url
    }

    pub(crate) fn pending(&self, now: DateTime<Utc>) -> PendingAuthorization {
        PendingAuthorization {
            state: self.state.clone(),
            code_verifier: self.code_verifier.clone(),
            redirect_uri: self.redirect_uri.clone(),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingAuthorization {
    pub state: String,
    pub code_verifier: String,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq)]
pub enum Consumed {
    Pending(PendingAuthorization),
    Duplicate,
    Expired,
    Unknown,
}

/// In-flight authorization attempts keyed by their state marker.
#[derive(Debug)]
pub struct PendingAuthorizations {
    pending: HashMap<String, PendingAuthorization>,
    consumed: VecDeque<String>,
    ttl: Duration,
}

impl PendingAuthorizations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            consumed: VecDeque::new(),
            ttl,
        }
    }

    pub fn register(&mut self, pending: PendingAuthorization) {
        self.prune_expired(pending.created_at);
        self.pending.insert(pending.state.clone(), pending);
    }

    /// Removes the attempt for `state` and marks it consumed.
    ///
    /// The marker is recorded before the caller acts on the callback, so a
    /// redelivered callback reports [`Consumed::Duplicate`].
    pub fn consume(&mut self, state: &str, now: DateTime<Utc>) -> Consumed {
        if self.consumed.iter().any(|s| s == state) {
            return Consumed::Duplicate;
        }
        let Some(pending) = self.pending.remove(state) else {
            return Consumed::Unknown;
        };
        self.remember(state);
        if pending.created_at + self.ttl < now {
            Consumed::Expired
        } else {
            Consumed::Pending(pending)
        }
    }

    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.pending.retain(|_, p| p.created_at + ttl >= now);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    fn remember(&mut self, state: &str) {
        if self.consumed.len() == CONSUMED_HISTORY {
            self.consumed.pop_front();
        }
        self.consumed.push_back(state.to_string());
    }
}

/// Parameters carried by the redirect back to the app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parses a full redirect URL such as `com.example.app:/oauth2callback?code=..&state=..`.
    pub fn from_redirect_url(raw: &str) -> Result<Self, AuthError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| AuthError::MalformedCallback(format!("invalid redirect URL: {e}")))?;
        Ok(Self::from_pairs(
            url.query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        ))
    }

    /// Parses a bare query string (`code=..&state=..`).
    pub fn from_query(query: &str) -> Self {
        let query = query.trim().trim_start_matches('?');
        Self::from_pairs(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        )
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "state" => params.state = Some(value),
                "code" => params.code = Some(value),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }
        params
    }
}
