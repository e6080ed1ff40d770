use super::*;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

impl App {
    pub fn render(&mut self, frame: &mut Frame) {
        let area = frame.area();

        if self.session.restrictions().pending {
            self.render_blocked(frame, area);
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(6),
                Constraint::Length(3),
                Constraint::Length(1),
            ])
            .split(area);

        self.render_status(frame, chunks[0]);
        self.render_session(frame, chunks[1]);
        self.render_input(frame, chunks[2]);
        self.render_footer(frame, chunks[3]);

        if self.show_help {
            self.render_help(frame, area);
        }

        if self.show_error_details {
            self.render_error_details(frame, area);
        }
    }

    fn render_blocked(&self, frame: &mut Frame, area: Rect) {
        let text = "\n\n  App restrictions are being applied.\n\n  Sign-in is unavailable until they are lifted.\n\n  Press [q] to quit\n";
        let paragraph = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(" appauth "))
            .centered();
        frame.render_widget(paragraph, area);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        let color = match self.status {
            SessionStatus::Authenticated => Color::Green,
            SessionStatus::Error => Color::Red,
            SessionStatus::AuthorizationPending | SessionStatus::RefreshPending => Color::Yellow,
            SessionStatus::Unauthenticated => Color::Gray,
        };
        let mut spans = vec![Span::styled(
            self.status.to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )];
        if self.is_busy() {
            spans.push(Span::raw("  (working...)"));
        }
        if let Some(ref error) = self.last_error {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(error.clone(), Style::default().fg(Color::Red)));
        }

        frame.render_widget(
            Paragraph::new(Line::from(spans))
                .block(Block::default().borders(Borders::ALL).title(" appauth ")),
            area,
        );
    }

    fn render_session(&self, frame: &mut Frame, area: Rect) {
        let snapshot = self.session.snapshot();
        let mut lines = Vec::new();

        let expiry = snapshot
            .token_expiry
            .map(|at| at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        lines.push(Line::from(format!("Authorized:     {}", yes_no(snapshot.is_authorized))));
        lines.push(Line::from(format!("Refresh token:  {}", yes_no(snapshot.has_refresh_token))));
        lines.push(Line::from(format!("Token expires:  {expiry}")));
        if let Some(ref error) = snapshot.last_authorization_error {
            lines.push(Line::from(format!("Last error:     {error}")));
        }

        if let Some(ref profile) = self.profile {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                "Profile",
                Style::default().add_modifier(Modifier::BOLD),
            )));
            let fields = [
                ("Name", profile.name.as_deref()),
                ("Given name", profile.given_name.as_deref()),
                ("Family name", profile.family_name.as_deref()),
                ("Email", profile.email.as_deref()),
                ("Picture", profile.picture.as_deref()),
            ];
            for (label, value) in fields {
                if let Some(value) = value {
                    lines.push(Line::from(format!("  {label:<12} {value}")));
                }
            }
        }

        if let Some(ref url) = self.authorization_url {
            lines.push(Line::from(""));
            lines.push(Line::from("Open this URL in a browser:"));
            lines.push(Line::from(Span::styled(
                url.clone(),
                Style::default().fg(Color::Cyan),
            )));
        }

        if let Some(ref message) = self.last_message {
            lines.push(Line::from(""));
            lines.push(Line::from(message.clone()));
        }

        frame.render_widget(
            Paragraph::new(lines)
                .wrap(Wrap { trim: false })
                .block(Block::default().borders(Borders::ALL).title(" Session ")),
            area,
        );
    }

    fn render_input(&self, frame: &mut Frame, area: Rect) {
        let (title, text) = match self.input.mode {
            InputMode::Normal => (" Input ", String::new()),
            InputMode::LoginHint => (
                " Login hint (Enter to continue, Esc to cancel) ",
                format!("{}_", self.input.buffer),
            ),
            InputMode::Callback => (
                " Redirect URL (paste, then Enter) ",
                format!("{}_", self.input.buffer),
            ),
        };
        frame.render_widget(
            Paragraph::new(text).block(Block::default().borders(Borders::ALL).title(title)),
            area,
        );
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let footer = self.keybinds.footer(self.status == SessionStatus::Authenticated);
        frame.render_widget(
            Paragraph::new(footer).style(Style::default().fg(Color::DarkGray)),
            area,
        );
    }

    fn render_help(&self, frame: &mut Frame, area: Rect) {
        let popup_area = self.centered_rect(60, 70, area);
        frame.render_widget(Clear, popup_area);
        frame.render_widget(
            Paragraph::new(self.keybinds.help_text()).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Help - Press ? to close "),
            ),
            popup_area,
        );
    }

    fn render_error_details(&self, frame: &mut Frame, area: Rect) {
        let popup_area = self.centered_rect(60, 30, area);
        let details = self
            .last_error_details
            .as_deref()
            .or(self.last_error.as_deref())
            .unwrap_or("No error details available.");
        let text = format!("{details}\n\n[Esc] or [Enter] to close");

        frame.render_widget(Clear, popup_area);
        frame.render_widget(
            Paragraph::new(text)
                .wrap(Wrap { trim: false })
                .block(Block::default().borders(Borders::ALL).title(" Error Details ")),
            popup_area,
        );
    }

    fn centered_rect(&self, percent_x: u16, percent_y: u16, r: Rect) -> Rect {
        let popup_layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ])
            .split(r);

        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ])
            .split(popup_layout[1])[1]
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appauth_core::{AuthConfig, HttpAuthorizationServer, MemoryStateStore};
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    fn app() -> App {
        let config = Config::default();
        let session = AuthSession::new(
            config.auth.clone(),
            Arc::new(HttpAuthorizationServer::new(&AuthConfig::default())),
            Arc::new(MemoryStateStore::new()),
        );
        App::new(config, session, PathBuf::from("restrictions.toml"))
    }

    #[test]
    fn signed_out_screen_offers_sign_in() {
        let mut app = app();
        let mut terminal = Terminal::new(TestBackend::new(100, 20)).unwrap();
        terminal.draw(|frame| app.render(frame)).unwrap();

        let text = buffer_text(&terminal);
        assert!(text.contains("Signed out"));
        assert!(text.contains("[a] sign in"));
    }

    #[test]
    fn blocked_screen_replaces_everything() {
        let mut app = app();
        app.session.apply_restrictions(Restrictions {
            pending: true,
            login_hint: None,
        });
        let mut terminal = Terminal::new(TestBackend::new(100, 20)).unwrap();
        terminal.draw(|frame| app.render(frame)).unwrap();

        let text = buffer_text(&terminal);
        assert!(text.contains("App restrictions are being applied."));
        assert!(!text.contains("[a] sign in"));
    }
}
