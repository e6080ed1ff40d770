pub struct Keybinds;

impl Default for Keybinds {
    fn default() -> Self {
        Self
    }
}

impl Keybinds {
    pub fn help_text(&self) -> String {
        r#"Keyboard Shortcuts:

Sign-in:
  a             Start authorization
  l             Start authorization with a login hint
  Enter         Submit the pasted redirect URL
  Esc           Cancel the pending authorization

Session:
  p             Fetch profile
  s             Sign out
  r             Reload app restrictions

General:
  ?             Toggle this help
  Shift + E     Show latest error details
  q / Ctrl + Q  Quit
"#
        .to_string()
    }

    pub fn footer(&self, signed_in: bool) -> &'static str {
        if signed_in {
            " [p] profile  [s] sign out  [a] re-authorize  [?] help  [q] quit "
        } else {
            " [a] sign in  [l] sign in as...  [?] help  [q] quit "
        }
    }
}
