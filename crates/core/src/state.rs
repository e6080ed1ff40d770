use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AuthError;

/// Seconds before the recorded expiry at which a token is treated as stale.
pub const DEFAULT_EXPIRY_MARGIN_SECS: i64 = 60;

/// Upper bound on `expires_in`, keeps expiry arithmetic in range.
const MAX_EXPIRES_IN_SECS: u64 = u32::MAX as u64;

/// OAuth error code plus optional human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ErrorDetail {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.error_description = Some(description.into());
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{} ({})", self.error, description),
            None => f.write_str(&self.error),
        }
    }
}

/// Successful response from the token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in.map(|secs| {
            let secs = secs.min(MAX_EXPIRES_IN_SECS) as i64;
            (now + Duration::seconds(secs)).trunc_subsecs(3)
        })
    }
}

/// Persisted OAuth credentials.
///
/// Values are replaced whole by [`AuthState::from_authorization_response`] and
/// [`AuthState::apply_refresh_response`]; nothing mutates individual token
/// fields in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(
        rename = "expiry",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub token_expiry: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_authorization_error: Option<ErrorDetail>,
}

impl AuthState {
    pub fn from_authorization_response(response: &TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_token: Some(response.access_token.clone()),
            refresh_token: response.refresh_token.clone(),
            id_token: response.id_token.clone(),
            token_expiry: response.expiry_from(now),
            scope: response.scope.clone(),
            token_type: response.token_type.clone(),
            last_authorization_error: None,
        }
    }

    /// State left behind by a declined authorization attempt.
    pub fn from_authorization_error(error: ErrorDetail) -> Self {
        Self {
            last_authorization_error: Some(error),
            ..Self::default()
        }
    }

    /// Builds the successor state after a refresh grant.
    ///
    /// The refresh and id tokens carry over unless the server issued new ones.
    pub fn apply_refresh_response(&self, response: &TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_token: Some(response.access_token.clone()),
            refresh_token: response
                .refresh_token
                .clone()
                .or_else(|| self.refresh_token.clone()),
            id_token: response.id_token.clone().or_else(|| self.id_token.clone()),
            token_expiry: response.expiry_from(now),
            scope: response.scope.clone().or_else(|| self.scope.clone()),
            token_type: response
                .token_type
                .clone()
                .or_else(|| self.token_type.clone()),
            last_authorization_error: None,
        }
    }

    pub fn is_access_token_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.token_expiry, Some(expiry) if expiry <= now)
    }

    pub fn is_authorized_at(&self, now: DateTime<Utc>) -> bool {
        let usable_access = self.access_token.is_some() && !self.is_access_token_expired(now);
        usable_access || self.refresh_token.is_some()
    }

    pub fn is_authorized(&self) -> bool {
        self.is_authorized_at(Utc::now())
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        if self.access_token.is_none() {
            return true;
        }
        matches!(self.token_expiry, Some(expiry) if expiry <= now + margin)
    }

    /// Returns the access token if it is usable without a refresh.
    pub fn fresh_access_token(&self, now: DateTime<Utc>, margin: Duration) -> Option<&str> {
        if self.needs_refresh(now, margin) {
            None
        } else {
            self.access_token.as_deref()
        }
    }

    /// Truncates the expiry to the millisecond precision the stored form keeps.
    ///
    /// A normalized state survives [`AuthState::to_json`] and
    /// [`AuthState::from_json`] unchanged.
    pub fn normalized(mut self) -> Self {
        self.token_expiry = self.token_expiry.map(|expiry| expiry.trunc_subsecs(3));
        self
    }

    pub fn to_json(&self) -> Result<String, AuthError> {
        serde_json::to_string(self).map_err(|e| AuthError::Storage(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        serde_json::from_str(json).map_err(|e| AuthError::PersistenceCorrupt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn margin() -> Duration {
        Duration::seconds(DEFAULT_EXPIRY_MARGIN_SECS)
    }

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn full_state() -> AuthState {
        AuthState {
            access_token: Some("abc".into()),
            refresh_token: Some("r1".into()),
            id_token: Some("id".into()),
            token_expiry: Some(at(1_800_000_000_123)),
            scope: Some("profile".into()),
            token_type: Some("Bearer".into()),
            last_authorization_error: None,
        }
    }

    #[test]
    fn json_roundtrip_preserves_every_field() {
        let state = full_state();
        let restored = AuthState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(restored, state);

        let with_error = AuthState::from_authorization_error(
            ErrorDetail::new("access_denied").with_description("nope"),
        );
        let restored = AuthState::from_json(&with_error.to_json().unwrap()).unwrap();
        assert_eq!(restored, with_error);
    }

    #[test]
    fn normalized_state_roundtrips_any_expiry() {
        let state = AuthState {
            token_expiry: Some(Utc::now()),
            ..full_state()
        }
        .normalized();
        let restored = AuthState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(restored, state);
        assert_eq!(state.clone().normalized(), state);

        let before_epoch = AuthState {
            token_expiry: Some(Utc.timestamp_opt(-1, 999_999_999).unwrap()),
            ..AuthState::default()
        }
        .normalized();
        let restored = AuthState::from_json(&before_epoch.to_json().unwrap()).unwrap();
        assert_eq!(restored, before_epoch);
    }

    #[test]
    fn parses_camel_case_blob_with_epoch_expiry() {
        let state =
            AuthState::from_json(r#"{"accessToken":"abc","refreshToken":"r1","expiry":1000}"#)
                .unwrap();
        assert_eq!(state.access_token.as_deref(), Some("abc"));
        assert_eq!(state.refresh_token.as_deref(), Some("r1"));
        assert_eq!(state.token_expiry, Some(at(1000)));
        assert!(state.id_token.is_none());
    }

    #[test]
    fn garbage_blob_is_reported_as_corrupt() {
        let err = AuthState::from_json("{not json").unwrap_err();
        assert!(matches!(err, AuthError::PersistenceCorrupt(_)));
    }

    #[test]
    fn empty_state_is_not_authorized() {
        assert!(!AuthState::default().is_authorized());
    }

    #[test]
    fn expired_access_token_without_refresh_is_not_authorized() {
        let now = at(10_000);
        let state = AuthState {
            access_token: Some("abc".into()),
            token_expiry: Some(at(5_000)),
            ..AuthState::default()
        };
        assert!(!state.is_authorized_at(now));

        let with_refresh = AuthState {
            refresh_token: Some("r1".into()),
            ..state
        };
        assert!(with_refresh.is_authorized_at(now));
    }

    #[test]
    fn unknown_expiry_counts_as_fresh() {
        let state = AuthState {
            access_token: Some("abc".into()),
            ..AuthState::default()
        };
        assert!(state.is_authorized_at(at(0)));
        assert!(!state.needs_refresh(at(0), margin()));
    }

    #[test]
    fn refresh_is_needed_inside_the_margin() {
        let now = at(1_000_000);
        let state = AuthState {
            access_token: Some("abc".into()),
            token_expiry: Some(now + Duration::seconds(30)),
            ..AuthState::default()
        };
        assert!(state.needs_refresh(now, margin()));
        assert!(state.fresh_access_token(now, margin()).is_none());
        assert_eq!(state.fresh_access_token(now, Duration::zero()), Some("abc"));
    }

    #[test]
    fn refresh_response_keeps_refresh_token_unless_rotated() {
        let now = at(2_000_000);
        let response = TokenResponse {
            access_token: "xyz".into(),
            token_type: None,
            refresh_token: None,
            id_token: None,
            expires_in: Some(3600),
            scope: None,
        };
        let next = full_state().apply_refresh_response(&response, now);
        assert_eq!(next.access_token.as_deref(), Some("xyz"));
        assert_eq!(next.refresh_token.as_deref(), Some("r1"));
        assert_eq!(next.id_token.as_deref(), Some("id"));
        assert_eq!(next.token_expiry, Some(now + Duration::seconds(3600)));

        let rotated = TokenResponse {
            refresh_token: Some("r2".into()),
            ..response
        };
        let next = full_state().apply_refresh_response(&rotated, now);
        assert_eq!(next.refresh_token.as_deref(), Some("r2"));
    }

    #[test]
    fn computed_expiry_survives_persistence() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"xyz","expires_in":3600}"#).unwrap();
        let state = AuthState::from_authorization_response(&response, Utc::now());
        let restored = AuthState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(restored, state);
    }
}
