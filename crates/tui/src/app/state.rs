use super::*;
use std::time::Instant;

pub struct App {
    pub config: Config,
    pub session: AuthSession,
    pub userinfo: Arc<UserInfoClient>,
    pub input: InputState,
    pub keybinds: Keybinds,
    pub status: SessionStatus,
    pub status_rx: watch::Receiver<SessionStatus>,
    pub authorization_url: Option<String>,
    pub profile: Option<UserProfile>,
    pub last_message: Option<String>,
    pub in_flight: usize,
    pub show_help: bool,
    pub restrictions_path: PathBuf,
    pub restrictions_checked_at: Option<Instant>,
    pub app_async_tx: Option<mpsc::UnboundedSender<AppAsyncEvent>>,
    pub app_async_rx: Option<mpsc::UnboundedReceiver<AppAsyncEvent>>,
    pub tasks: CancellationToken,
    pub last_error: Option<String>,
    pub last_error_details: Option<String>,
    pub show_error_details: bool,
}

impl App {
    pub fn new(config: Config, session: AuthSession, restrictions_path: PathBuf) -> Self {
        let (app_async_tx, app_async_rx) = mpsc::unbounded_channel();
        let userinfo = Arc::new(UserInfoClient::new(&config.auth));
        let status_rx = session.subscribe();

        Self {
            config,
            status: session.status(),
            session,
            userinfo,
            input: InputState::new(),
            keybinds: Keybinds,
            status_rx,
            authorization_url: None,
            profile: None,
            last_message: None,
            in_flight: 0,
            show_help: false,
            restrictions_path,
            restrictions_checked_at: None,
            app_async_tx: Some(app_async_tx),
            app_async_rx: Some(app_async_rx),
            tasks: CancellationToken::new(),
            last_error: None,
            last_error_details: None,
            show_error_details: false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }
}
