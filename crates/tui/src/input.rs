#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputMode {
    Normal,
    /// Typing an account to pass as `login_hint`.
    LoginHint,
    /// Pasting the redirect URL the browser landed on.
    Callback,
}

pub struct InputState {
    pub buffer: String,
    pub mode: InputMode,
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}

impl InputState {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            mode: InputMode::Normal,
        }
    }

    pub fn begin(&mut self, mode: InputMode) {
        self.buffer.clear();
        self.mode = mode;
    }

    pub fn is_editing(&self) -> bool {
        self.mode != InputMode::Normal
    }

    pub fn handle_char(&mut self, c: char) {
        if self.is_editing() && !c.is_control() {
            self.buffer.push(c);
        }
    }

    pub fn handle_paste(&mut self, text: &str) {
        if self.is_editing() {
            self.buffer
                .extend(text.chars().filter(|c| !c.is_control()));
        }
    }

    pub fn handle_backspace(&mut self) {
        self.buffer.pop();
    }

    /// Takes the trimmed buffer and returns to normal mode.
    pub fn submit(&mut self) -> (InputMode, String) {
        let mode = self.mode;
        let value = self.buffer.trim().to_string();
        self.clear();
        (mode, value)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.mode = InputMode::Normal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_is_ignored_outside_edit_modes() {
        let mut input = InputState::new();
        input.handle_char('a');
        assert!(input.buffer.is_empty());
    }

    #[test]
    fn pasted_newlines_are_dropped() {
        let mut input = InputState::new();
        input.begin(InputMode::Callback);
        input.handle_paste("app:/cb?code=1\r\n&state=2\n");
        assert_eq!(input.buffer, "app:/cb?code=1&state=2");

        let (mode, value) = input.submit();
        assert_eq!(mode, InputMode::Callback);
        assert_eq!(value, "app:/cb?code=1&state=2");
        assert_eq!(input.mode, InputMode::Normal);
    }
}
