use super::*;

impl App {
    /// Returns `Ok(true)` when the app should quit.
    pub fn handle_event(&mut self, event: Event) -> Result<bool> {
        match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => self.handle_key_event(key),
            Event::Paste(text) => {
                self.input.handle_paste(&text);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn handle_key_event(&mut self, key: KeyEvent) -> Result<bool> {
        if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Ok(true);
        }

        if self.session.restrictions().pending {
            // Only quitting is allowed until restrictions settle.
            return Ok(key.code == KeyCode::Char('q'));
        }

        if self.input.is_editing() {
            self.handle_edit_key(key);
            return Ok(false);
        }

        if self.show_help {
            if matches!(key.code, KeyCode::Esc | KeyCode::Char('?')) {
                self.show_help = false;
            }
            return Ok(false);
        }

        if self.show_error_details {
            if matches!(key.code, KeyCode::Esc | KeyCode::Enter | KeyCode::Char('E')) {
                self.show_error_details = false;
            }
            return Ok(false);
        }

        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('?') => self.show_help = true,
            KeyCode::Char('E') if self.last_error.is_some() => self.show_error_details = true,
            KeyCode::Char('a') => self.start_authorization(None),
            KeyCode::Char('l') => self.input.begin(InputMode::LoginHint),
            KeyCode::Char('p') => self.fetch_profile(),
            KeyCode::Char('s') => self.sign_out(),
            KeyCode::Char('r') => {
                self.reload_restrictions();
                self.last_message = Some("Restrictions reloaded.".to_string());
            }
            KeyCode::Esc if self.authorization_url.is_some() => self.cancel_authorization(),
            _ => {}
        }
        Ok(false)
    }

    fn handle_edit_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => {
                let (mode, value) = self.input.submit();
                match mode {
                    InputMode::LoginHint => {
                        let hint = Some(value).filter(|v| !v.is_empty());
                        self.start_authorization(hint);
                    }
                    InputMode::Callback if value.is_empty() => {
                        self.input.begin(InputMode::Callback);
                    }
                    InputMode::Callback => self.submit_callback(&value),
                    InputMode::Normal => {}
                }
            }
            KeyCode::Esc => {
                let mode = self.input.mode;
                self.input.clear();
                if mode == InputMode::Callback {
                    self.cancel_authorization();
                }
            }
            KeyCode::Backspace => self.input.handle_backspace(),
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.input.handle_char(c)
            }
            _ => {}
        }
    }
}
