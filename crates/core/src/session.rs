//! The OAuth session state machine.
//!
//! [`AuthSession`] owns the [`AuthState`], drives the authorization-code
//! exchange, persists every accepted state through a [`StateStore`] and hands
//! out fresh access tokens via [`AuthSession::with_fresh_token`].
//!
//! Refreshing is single-flight: callers that find the access token stale
//! while a refresh is already running join that refresh instead of starting
//! another one, and all of them observe the same outcome.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::request::{
    AuthorizationRequest, CallbackParams, Consumed, PendingAuthorization, PendingAuthorizations,
};
use crate::restrictions::Restrictions;
use crate::server::AuthorizationServer;
use crate::state::{AuthState, ErrorDetail, TokenResponse};
use crate::store::{StateStore, AUTH_STATE_SLOT};

type SharedRefresh = Shared<BoxFuture<'static, Result<AuthState, AuthError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unauthenticated,
    AuthorizationPending,
    Authenticated,
    RefreshPending,
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Unauthenticated => "Signed out",
            SessionStatus::AuthorizationPending => "Waiting for authorization",
            SessionStatus::Authenticated => "Signed in",
            SessionStatus::RefreshPending => "Refreshing token",
            SessionStatus::Error => "Sign-in failed",
        };
        f.write_str(label)
    }
}

/// Read-only projection handed to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub is_authorized: bool,
    pub has_refresh_token: bool,
    pub token_expiry: Option<chrono::DateTime<Utc>>,
    pub last_authorization_error: Option<ErrorDetail>,
    pub pending_authorizations: usize,
    pub restrictions_pending: bool,
}

struct SessionCore {
    state: Option<AuthState>,
    pending: PendingAuthorizations,
    restrictions: Restrictions,
    refresh: Option<SharedRefresh>,
    /// Bumped whenever the credential set is replaced wholesale, so a
    /// refresh started against an older set cannot write over a newer one.
    generation: u64,
}

struct Inner {
    config: AuthConfig,
    server: Arc<dyn AuthorizationServer>,
    store: Arc<dyn StateStore>,
    core: Mutex<SessionCore>,
    status_tx: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
}

/// Handle to the OAuth session. Clones share the same state.
#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<Inner>,
}

impl AuthSession {
    pub fn new(
        config: AuthConfig,
        server: Arc<dyn AuthorizationServer>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Unauthenticated);
        let core = SessionCore {
            state: None,
            pending: PendingAuthorizations::new(config.pending_ttl()),
            restrictions: Restrictions::default(),
            refresh: None,
            generation: 0,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                server,
                store,
                core: Mutex::new(core),
                status_tx,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    /// Restores any persisted state. Call once before using the session.
    pub fn init(&self) -> Option<AuthState> {
        let restored = self.restore();
        info!(
            authorized = restored.as_ref().is_some_and(AuthState::is_authorized),
            "Auth session initialised"
        );
        restored
    }

    /// Cancels in-flight network work. No state is written after this.
    pub fn dispose(&self) {
        self.inner.cancel.cancel();
        self.inner.lock().pending.clear();
        info!("Auth session disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn current_state(&self) -> Option<AuthState> {
        self.inner.lock().state.clone()
    }

    pub fn is_authorized(&self) -> bool {
        self.inner
            .lock()
            .state
            .as_ref()
            .is_some_and(AuthState::is_authorized)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let core = self.inner.lock();
        let state = core.state.as_ref();
        SessionSnapshot {
            status: self.status(),
            is_authorized: state.is_some_and(AuthState::is_authorized),
            has_refresh_token: state.is_some_and(|s| s.refresh_token.is_some()),
            token_expiry: state.and_then(|s| s.token_expiry),
            last_authorization_error: state.and_then(|s| s.last_authorization_error.clone()),
            pending_authorizations: core.pending.len(),
            restrictions_pending: core.restrictions.pending,
        }
    }

    pub fn apply_restrictions(&self, restrictions: Restrictions) {
        let mut core = self.inner.lock();
        if core.restrictions != restrictions {
            info!(pending = restrictions.pending, "App restrictions changed");
            core.restrictions = restrictions;
        }
    }

    pub fn restrictions(&self) -> Restrictions {
        self.inner.lock().restrictions.clone()
    }

    /// Starts a login attempt.
    ///
    /// An explicit `login_hint` wins over the one from the current
    /// restrictions. The returned request's URL is meant for a browser; the
    /// redirect comes back through [`AuthSession::complete_authorization`].
    pub fn begin_authorization(
        &self,
        login_hint: Option<String>,
    ) -> Result<AuthorizationRequest, AuthError> {
        let mut core = self.inner.lock();
        let restriction_hint = core.restrictions.check()?.map(str::to_string);
        let login_hint = match (login_hint, restriction_hint) {
            (Some(hint), _) => Some(hint),
            (None, Some(hint)) => {
                debug!("Using login hint from app restrictions");
                Some(hint)
            }
            (None, None) => None,
        };
        let request = AuthorizationRequest::new(&self.inner.config, login_hint)?;
        core.pending.register(request.pending(Utc::now()));
        self.inner.set_status(SessionStatus::AuthorizationPending);
        info!(
            login_hint = request.login_hint.is_some(),
            "Authorization request started"
        );
        Ok(request)
    }

    /// Drops every outstanding login attempt.
    pub fn cancel_authorization(&self) {
        let mut core = self.inner.lock();
        core.pending.clear();
        if self.status() == SessionStatus::AuthorizationPending {
            let status = Inner::settled_status(&core);
            self.inner.set_status(status);
        }
    }

    /// Handles the redirect for a login attempt.
    ///
    /// Each callback is consumed before it is acted on: a redelivered
    /// callback yields [`AuthError::DuplicateCallback`] and never reaches the
    /// token endpoint. Failures are reported, never retried.
    pub async fn complete_authorization(
        &self,
        callback: CallbackParams,
    ) -> Result<AuthState, AuthError> {
        let (pending, code, generation) = {
            let mut core = self.inner.lock();
            core.restrictions.check()?;
            let Some(ref marker) = callback.state else {
                return Err(AuthError::MalformedCallback("missing state".into()));
            };
            let pending = match core.pending.consume(marker, Utc::now()) {
                Consumed::Pending(pending) => pending,
                Consumed::Duplicate => {
                    debug!("Ignoring already handled authorization callback");
                    return Err(AuthError::DuplicateCallback);
                }
                Consumed::Unknown => {
                    return Err(AuthError::MalformedCallback("unknown state".into()));
                }
                Consumed::Expired => {
                    self.inner.set_status(SessionStatus::Error);
                    return Err(AuthError::MalformedCallback(
                        "authorization attempt expired".into(),
                    ));
                }
            };

            if let Some(error) = callback.error {
                let detail = ErrorDetail {
                    error,
                    error_description: callback.error_description,
                };
                warn!(error = %detail, "Authorization denied");
                let authorized = core.state.as_ref().is_some_and(AuthState::is_authorized);
                if !authorized {
                    core.state = Some(AuthState::from_authorization_error(detail.clone()));
                }
                let status = Inner::settled_status(&core);
                self.inner.set_status(status);
                return Err(AuthError::AuthorizationDenied {
                    error: detail.error,
                    description: detail.error_description,
                });
            }

            let Some(code) = callback.code else {
                self.inner.set_status(SessionStatus::Error);
                return Err(AuthError::MalformedCallback("missing code".into()));
            };
            (pending, code, core.generation)
        };

        info!("Exchanging authorization code");
        // Spawned so the exchange settles even if the caller goes away.
        let inner = Arc::clone(&self.inner);
        match tokio::spawn(inner.run_exchange(generation, pending, code)).await {
            Ok(result) => result,
            Err(e) => Err(AuthError::Transport(format!("exchange task failed: {e}"))),
        }
    }

    /// Runs `action` with an access token that is valid right now.
    ///
    /// A stale token is refreshed first; concurrent callers share one
    /// refresh request.
    pub async fn with_fresh_token<F, Fut, T>(&self, action: F) -> Result<T, AuthError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = T>,
    {
        let token = self.fresh_access_token().await?;
        Ok(action(token).await)
    }

    pub async fn fresh_access_token(&self) -> Result<String, AuthError> {
        let refresh = {
            let mut core = self.inner.lock();
            core.restrictions.check()?;
            let Some(state) = core.state.as_ref() else {
                return Err(AuthError::Unauthenticated);
            };
            if let Some(token) = state.fresh_access_token(Utc::now(), self.inner.config.expiry_margin()) {
                return Ok(token.to_string());
            }
            let refresh_token = state.refresh_token.clone();

            match (core.refresh.clone(), refresh_token) {
                (Some(in_flight), _) => {
                    debug!("Joining in-flight token refresh");
                    in_flight
                }
                (None, Some(refresh_token)) => self.start_refresh(&mut core, refresh_token),
                (None, None) => {
                    debug!("Access token expired and no refresh token is available");
                    self.inner.set_status(SessionStatus::Unauthenticated);
                    return Err(AuthError::Unauthenticated);
                }
            }
        };

        let state = refresh.await?;
        state.access_token.ok_or(AuthError::Unauthenticated)
    }

    fn start_refresh(&self, core: &mut SessionCore, refresh_token: String) -> SharedRefresh {
        info!("Access token stale, refreshing");
        let generation = core.generation;
        let inner = Arc::clone(&self.inner);
        // Spawned so a caller going away does not abort the refresh halfway.
        let task = tokio::spawn(inner.run_refresh(generation, refresh_token));
        let refresh = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(AuthError::Transport(format!("refresh task failed: {e}"))),
            }
        }
        .boxed()
        .shared();
        core.refresh = Some(refresh.clone());
        self.inner.set_status(SessionStatus::RefreshPending);
        refresh
    }

    /// Clears memory and the persisted slot. Safe to call repeatedly.
    pub fn sign_out(&self) -> Result<(), AuthError> {
        let mut core = self.inner.lock();
        core.pending.clear();
        core.state = None;
        core.refresh = None;
        core.generation += 1;
        let removed = self.inner.store.remove(AUTH_STATE_SLOT);
        self.inner.set_status(SessionStatus::Unauthenticated);
        info!("Signed out");
        removed
    }

    /// Loads the persisted state, treating anything unreadable as no session.
    pub fn restore(&self) -> Option<AuthState> {
        let restored = match self.inner.store.load(AUTH_STATE_SLOT) {
            Ok(Some(blob)) => match AuthState::from_json(&blob) {
                Ok(state) => Some(state.normalized()),
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("{}", AuthError::PersistenceCorrupt(e.to_string()));
                None
            }
        };

        let mut core = self.inner.lock();
        core.state = restored.clone();
        core.refresh = None;
        core.generation += 1;
        let status = Inner::settled_status(&core);
        self.inner.set_status(status);
        restored
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, status: SessionStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            debug!(from = ?previous, to = ?status, "Session status changed");
        }
    }

    fn settled_status(core: &SessionCore) -> SessionStatus {
        if core.state.as_ref().is_some_and(AuthState::is_authorized) {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Unauthenticated
        }
    }

    /// Writes `state` to the store and returns the value to keep in memory.
    fn persist(&self, state: AuthState) -> Result<AuthState, AuthError> {
        let state = state.normalized();
        let blob = state.to_json()?;
        self.store.save(AUTH_STATE_SLOT, &blob).map_err(|e| {
            error!("Failed to persist auth state: {}", e);
            e
        })?;
        Ok(state)
    }

    async fn run_exchange(
        self: Arc<Self>,
        generation: u64,
        pending: PendingAuthorization,
        code: String,
    ) -> Result<AuthState, AuthError> {
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AuthError::Cancelled),
            result = self.server.exchange_code(&code, &pending.code_verifier, &pending.redirect_uri) => result,
        };
        self.finish_exchange(generation, response)
    }

    fn finish_exchange(
        &self,
        generation: u64,
        response: Result<TokenResponse, AuthError>,
    ) -> Result<AuthState, AuthError> {
        let mut core = self.lock();
        if core.generation != generation {
            debug!("Session changed during code exchange, dropping tokens");
            return Err(AuthError::Cancelled);
        }
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("Token exchange failed: {}", e);
                self.set_status(SessionStatus::Error);
                return Err(e);
            }
        };

        let state = AuthState::from_authorization_response(&response, Utc::now());
        let state = match self.persist(state) {
            Ok(state) => state,
            Err(e) => {
                self.set_status(SessionStatus::Error);
                return Err(e);
            }
        };
        core.state = Some(state.clone());
        core.refresh = None;
        core.generation += 1;
        self.set_status(SessionStatus::Authenticated);
        info!(
            refresh_token = state.refresh_token.is_some(),
            id_token = state.id_token.is_some(),
            "Authorization complete"
        );
        Ok(state)
    }

    async fn run_refresh(
        self: Arc<Self>,
        generation: u64,
        refresh_token: String,
    ) -> Result<AuthState, AuthError> {
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AuthError::Cancelled),
            result = self.server.refresh(&refresh_token) => result,
        };
        self.finish_refresh(generation, response)
    }

    fn finish_refresh(
        &self,
        generation: u64,
        response: Result<TokenResponse, AuthError>,
    ) -> Result<AuthState, AuthError> {
        let mut core = self.lock();
        if core.generation != generation {
            debug!("Credentials replaced during refresh, discarding result");
            return core
                .state
                .clone()
                .filter(AuthState::is_authorized)
                .ok_or(AuthError::Unauthenticated);
        }
        core.refresh = None;

        match response {
            Ok(response) => {
                let current = core.state.clone().unwrap_or_default();
                let next = current.apply_refresh_response(&response, Utc::now());
                let next = match self.persist(next) {
                    Ok(next) => next,
                    Err(e) => {
                        let status = Self::settled_status(&core);
                        self.set_status(status);
                        return Err(e);
                    }
                };
                core.state = Some(next.clone());
                self.set_status(SessionStatus::Authenticated);
                info!("Token refresh complete");
                Ok(next)
            }
            Err(AuthError::RefreshFailed(detail)) => {
                warn!(error = %detail, "Refresh token rejected, signing out");
                core.state = None;
                core.generation += 1;
                if let Err(e) = self.store.remove(AUTH_STATE_SLOT) {
                    error!("Failed to clear persisted auth state: {}", e);
                }
                self.set_status(SessionStatus::Unauthenticated);
                Err(AuthError::RefreshFailed(detail))
            }
            Err(e) => {
                warn!("Token refresh did not complete: {}", e);
                let status = Self::settled_status(&core);
                self.set_status(status);
                Err(e)
            }
        }
    }
}
