use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::AuthError;

pub const PENDING_ENV: &str = "APPAUTH_RESTRICTIONS_PENDING";
pub const LOGIN_HINT_ENV: &str = "APPAUTH_LOGIN_HINT";

/// Externally provisioned restrictions, as set by whoever manages the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Restrictions {
    pub pending: bool,
    pub login_hint: Option<String>,
}

impl Restrictions {
    /// Reads `path` then applies env overrides.
    pub fn load(path: &Path) -> Self {
        Self::from_file(path).with_overrides(|key| std::env::var(key).ok())
    }

    /// Parses `path` alone. A missing file means no restrictions.
    pub fn from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<Restrictions>(&content) {
                Ok(restrictions) => restrictions,
                Err(e) => {
                    warn!("Ignoring unreadable restrictions file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(pending) = lookup(PENDING_ENV) {
            self.pending = matches!(pending.trim(), "1" | "true" | "TRUE" | "yes");
        }
        if let Some(hint) = lookup(LOGIN_HINT_ENV) {
            self.login_hint = Some(hint);
        }
        self.login_hint = self.login_hint.filter(|hint| !hint.trim().is_empty());
        self
    }

    /// The login hint to seed authorization with, or an error while pending.
    pub fn check(&self) -> Result<Option<&str>, AuthError> {
        if self.pending {
            return Err(AuthError::RestrictionsPending);
        }
        Ok(self.login_hint.as_deref())
    }
}
