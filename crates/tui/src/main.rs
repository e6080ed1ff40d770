use anyhow::Context;
use appauth::app::App;
use appauth::config::{config_path, Config};
use appauth_core::store::data_dir;
use appauth_core::{AuthSession, FileStateStore, HttpAuthorizationServer, MemoryStateStore, StateStore};
use crossterm::event::{DisableBracketedPaste, EnableBracketedPaste};
use ratatui::crossterm::event;
use ratatui::crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const EPHEMERAL_FLAG: &str = "--ephemeral";

fn init_logging(log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("appauth.log"))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config_path = config_path();
    let mut config =
        Config::load_or_default(&config_path).with_env_overrides(|key| std::env::var(key).ok());
    if std::env::args().any(|arg| arg == EPHEMERAL_FLAG) {
        config.storage.ephemeral = true;
    }
    config.auth.validate().context("invalid auth configuration")?;

    let data_dir = match config.storage.dir.clone() {
        Some(dir) => dir,
        None => data_dir()?,
    };
    if let Err(e) = init_logging(&data_dir) {
        eprintln!("Logging disabled: {e}");
    }
    tracing::info!(config = %config_path.display(), ephemeral = config.storage.ephemeral, "Starting appauth");

    let store: Arc<dyn StateStore> = if config.storage.ephemeral {
        Arc::new(MemoryStateStore::new())
    } else {
        Arc::new(FileStateStore::new(&data_dir))
    };
    let server = Arc::new(HttpAuthorizationServer::new(&config.auth));
    let session = AuthSession::new(config.auth.clone(), server, store);
    let restrictions_path = config.restrictions_path(&config_path);

    let rt = tokio::runtime::Runtime::new()?;
    let guard = rt.enter();
    let mut app = App::new(config, session, restrictions_path);
    app.init();

    terminal::enable_raw_mode()?;
    let mut terminal = ratatui::init();
    ratatui::crossterm::execute!(io::stdout(), EnterAlternateScreen, EnableBracketedPaste)?;

    let result = run(&mut terminal, &mut app);

    app.shutdown();
    let _ = ratatui::crossterm::execute!(io::stdout(), DisableBracketedPaste, LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();
    ratatui::restore();
    drop(guard);
    rt.shutdown_timeout(Duration::from_secs(1));
    tracing::info!("appauth exited");

    result
}

fn run(terminal: &mut ratatui::DefaultTerminal, app: &mut App) -> anyhow::Result<()> {
    loop {
        terminal.draw(|frame| app.render(frame))?;

        if event::poll(Duration::from_millis(50))? {
            let event = event::read()?;
            match app.handle_event(event) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to handle input: {}", e),
            }
        }

        app.tick();
    }

    Ok(())
}
