use crate::input::{InputMode, InputState};
use crate::keybinds::Keybinds;
use crate::Config;
use anyhow::Result;
use appauth_core::{
    AuthError, AuthSession, CallbackParams, Restrictions, SessionStatus, UserInfoClient,
    UserInfoOutcome, UserProfile,
};
use ratatui::crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::layout::Rect;
use ratatui::Frame;
use regex::Regex;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

mod effects;
mod input;
mod render;
mod state;
mod types;

pub use state::App;
pub use types::AppAsyncEvent;

impl App {
    pub(super) fn report_error(&mut self, context: &str, error: impl std::fmt::Display) {
        let message = format!("{context}: {}", Self::redact_sensitive(&error.to_string()));
        self.last_error = Some(message.clone());
        self.last_error_details = None;
        tracing::warn!("{message}");
    }

    /// Shows the friendly message and keeps the full error for the details view.
    pub(super) fn report_auth_error(&mut self, context: &str, error: &AuthError) {
        if error.is_silent() {
            tracing::debug!("{context}: {error}");
            return;
        }
        self.report_error(context, error.user_message());
        self.last_error_details = Some(Self::redact_sensitive(&error.to_string()));
        if error.requires_reauthorization() {
            self.profile = None;
            self.last_message = Some("Press [a] to sign in again.".to_string());
        }
    }

    pub(super) fn clear_error(&mut self) {
        self.last_error = None;
        self.last_error_details = None;
        self.show_error_details = false;
    }

    pub(super) fn redact_sensitive(input: &str) -> String {
        static BEARER: OnceLock<Option<Regex>> = OnceLock::new();
        static TOKEN_PARAM: OnceLock<Option<Regex>> = OnceLock::new();

        let bearer = BEARER.get_or_init(|| Regex::new(r"(?i)(bearer\s+)[A-Za-z0-9\-._~+/]+=*").ok());
        let token_param = TOKEN_PARAM.get_or_init(|| {
            Regex::new(
                r#"((?:access_token|refresh_token|id_token|code_verifier|code)"?\s*[:=]\s*"?)[^"&\s,}]+"#,
            )
            .ok()
        });

        let mut output = input.to_string();
        for re in [bearer, token_param].into_iter().flatten() {
            output = re.replace_all(&output, "${1}[REDACTED]").into_owned();
        }
        output
    }

    /// Runs `future` on the runtime and hands its event back to the UI loop.
    /// Nothing is delivered once the app has shut down.
    pub(super) fn spawn_app_task<F>(&mut self, future: F)
    where
        F: Future<Output = AppAsyncEvent> + Send + 'static,
    {
        if let Some(tx) = self.app_async_tx.clone() {
            let cancel = self.tasks.clone();
            self.in_flight += 1;
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    event = future => {
                        let _ = tx.send(event);
                    }
                }
            });
        }
    }
}
