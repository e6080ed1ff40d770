use super::*;
use std::time::Instant;

impl App {
    pub fn init(&mut self) {
        self.reload_restrictions();
        if let Some(state) = self.session.init() {
            if state.is_authorized() {
                self.last_message = Some("Restored previous session.".to_string());
            } else if let Some(ref error) = state.last_authorization_error {
                self.last_message = Some(format!("Last sign-in attempt failed: {error}"));
            }
        }
        self.status = *self.status_rx.borrow_and_update();
    }

    pub fn reload_restrictions(&mut self) {
        let restrictions = Restrictions::load(&self.restrictions_path);
        if restrictions.pending {
            self.input.clear();
            self.authorization_url = None;
        }
        self.session.apply_restrictions(restrictions);
        self.restrictions_checked_at = Some(Instant::now());
    }

    /// Periodic housekeeping driven by the UI loop.
    pub fn tick(&mut self) {
        let due = self
            .restrictions_checked_at
            .map_or(true, |at| at.elapsed() >= self.config.restrictions.poll_interval());
        if due {
            self.reload_restrictions();
        }
        self.process_async_events();
    }

    pub(super) fn start_authorization(&mut self, login_hint: Option<String>) {
        match self.session.begin_authorization(login_hint) {
            Ok(request) => {
                tracing::info!("Authorization URL ready, waiting for redirect");
                self.authorization_url = Some(request.url().to_string());
                self.input.begin(InputMode::Callback);
                self.last_message =
                    Some("Open the URL, approve access, then paste the redirect URL.".to_string());
                self.clear_error();
            }
            Err(e) => self.report_auth_error("Could not start sign-in", &e),
        }
    }

    pub(super) fn cancel_authorization(&mut self) {
        self.session.cancel_authorization();
        self.authorization_url = None;
        self.last_message = None;
    }

    pub(super) fn submit_callback(&mut self, raw: &str) {
        let params = if raw.contains("://") || raw.contains(":/") {
            match CallbackParams::from_redirect_url(raw) {
                Ok(params) => params,
                Err(e) => {
                    self.report_auth_error("Sign-in", &e);
                    self.input.begin(InputMode::Callback);
                    return;
                }
            }
        } else {
            CallbackParams::from_query(raw)
        };

        self.authorization_url = None;
        self.last_message = Some("Completing sign-in...".to_string());
        let session = self.session.clone();
        self.spawn_app_task(async move {
            let result = session.complete_authorization(params).await.map(|_| ());
            AppAsyncEvent::AuthorizationCompleted { result }
        });
    }

    pub(super) fn fetch_profile(&mut self) {
        let session = self.session.clone();
        let userinfo = Arc::clone(&self.userinfo);
        self.last_message = Some("Fetching profile...".to_string());
        self.spawn_app_task(async move {
            let result = userinfo.fetch_profile(&session).await;
            AppAsyncEvent::ProfileFetched { result }
        });
    }

    pub(super) fn sign_out(&mut self) {
        if let Err(e) = self.session.sign_out() {
            self.report_auth_error("Sign out", &e);
        } else {
            self.clear_error();
        }
        self.profile = None;
        self.authorization_url = None;
        self.input.clear();
        self.last_message = Some("Signed out.".to_string());
    }

    pub fn process_async_events(&mut self) {
        let mut async_events = Vec::new();
        if let Some(ref mut rx) = self.app_async_rx {
            while let Ok(event) = rx.try_recv() {
                async_events.push(event);
            }
        }

        for event in async_events {
            self.in_flight = self.in_flight.saturating_sub(1);
            match event {
                AppAsyncEvent::AuthorizationCompleted { result } => match result {
                    Ok(()) => {
                        self.clear_error();
                        self.last_message = Some("Signed in.".to_string());
                    }
                    Err(e) => {
                        if !e.is_silent() {
                            self.last_message = None;
                        }
                        self.report_auth_error("Sign-in", &e);
                    }
                },
                AppAsyncEvent::ProfileFetched { result } => match result {
                    Ok(Some(outcome)) => {
                        self.last_message = Some(outcome.message());
                        match outcome {
                            UserInfoOutcome::Profile(profile) => {
                                self.clear_error();
                                self.profile = Some(profile);
                            }
                            UserInfoOutcome::Rejected { error, description } => {
                                let details = description.unwrap_or(error);
                                self.report_error("Fetch profile", details);
                            }
                        }
                    }
                    Ok(None) => {
                        self.last_message = None;
                        self.report_error("Fetch profile", "No usable response from the server");
                    }
                    Err(e) => {
                        self.last_message = None;
                        self.report_auth_error("Fetch profile", &e);
                    }
                },
            }
        }

        if self.status_rx.has_changed().unwrap_or(false) {
            let status = *self.status_rx.borrow_and_update();
            self.on_status_changed(status);
        }
    }

    fn on_status_changed(&mut self, status: SessionStatus) {
        tracing::debug!(?status, "UI observed session status");
        if status == SessionStatus::Unauthenticated {
            self.profile = None;
        }
        self.status = status;
    }

    /// Stops background work. Called once when the UI loop exits.
    pub fn shutdown(&mut self) {
        self.tasks.cancel();
        self.session.dispose();
        self.app_async_tx = None;
    }
}
