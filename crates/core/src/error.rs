use crate::state::ErrorDetail;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AuthError {
    #[error("Authorization denied: {error}{}", parenthesized(.description))]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("Token exchange failed: {0}")]
    ExchangeFailed(ErrorDetail),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(ErrorDetail),

    #[error("Persisted auth state is unreadable: {0}")]
    PersistenceCorrupt(String),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("App restrictions are pending")]
    RestrictionsPending,

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Malformed authorization callback: {0}")]
    MalformedCallback(String),

    #[error("Authorization callback already handled")]
    DuplicateCallback,

    #[error("State store error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

fn parenthesized(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

impl AuthError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::AuthorizationDenied { .. } => "Authorization was denied.",
            AuthError::ExchangeFailed(_) => "Sign-in failed while exchanging the code. Please try again.",
            AuthError::RefreshFailed(_) => "Your session expired. Please sign in again.",
            AuthError::PersistenceCorrupt(_) => "Saved session could not be read. Please sign in.",
            AuthError::Transport(_) => "Network error. Check your connection.",
            AuthError::RestrictionsPending => {
                "App restrictions are being updated. Please try again later."
            }
            AuthError::Unauthenticated => "You are not signed in.",
            AuthError::MalformedCallback(_) => "The sign-in response was not recognised.",
            AuthError::DuplicateCallback => "The sign-in response was already handled.",
            AuthError::Storage(_) => "Could not save the session.",
            AuthError::Config(_) => "Invalid configuration.",
            AuthError::Cancelled => "Cancelled.",
        }
    }

    /// The user must go through the authorization flow again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, AuthError::RefreshFailed(_) | AuthError::Unauthenticated)
    }

    /// Errors the shell should drop without telling the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, AuthError::DuplicateCallback | AuthError::Cancelled)
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        AuthError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(e: std::io::Error) -> Self {
        AuthError::Storage(e.to_string())
    }
}
