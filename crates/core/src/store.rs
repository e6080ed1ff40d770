use directories::ProjectDirs;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::AuthError;

/// Slot holding the serialized [`AuthState`](crate::state::AuthState).
pub const AUTH_STATE_SLOT: &str = "auth_state";

/// Key/value persistence for opaque blobs.
///
/// `save` must replace the previous value in one step: a reader never sees a
/// half-written blob.
pub trait StateStore: Send + Sync {
    fn load(&self, slot: &str) -> Result<Option<String>, AuthError>;
    fn save(&self, slot: &str, blob: &str) -> Result<(), AuthError>;
    fn remove(&self, slot: &str) -> Result<(), AuthError>;
}

/// One JSON file per slot inside a directory.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, slot: &str) -> PathBuf {
        self.dir.join(format!("{slot}.json"))
    }

    fn write_secure_file(path: &Path, bytes: &[u8]) -> Result<(), AuthError> {
        let tmp = path.with_extension("json.tmp");
        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        {
            let mut file = options.open(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn load(&self, slot: &str) -> Result<Option<String>, AuthError> {
        match fs::read_to_string(self.slot_path(slot)) {
            Ok(blob) if blob.trim().is_empty() => Ok(None),
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, slot: &str, blob: &str) -> Result<(), AuthError> {
        fs::create_dir_all(&self.dir)?;
        Self::write_secure_file(&self.slot_path(slot), blob.as_bytes())
    }

    fn remove(&self, slot: &str) -> Result<(), AuthError> {
        match fs::remove_file(self.slot_path(slot)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStateStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, slot: &str) -> Result<Option<String>, AuthError> {
        Ok(self.slots().get(slot).cloned())
    }

    fn save(&self, slot: &str, blob: &str) -> Result<(), AuthError> {
        self.slots().insert(slot.to_string(), blob.to_string());
        Ok(())
    }

    fn remove(&self, slot: &str) -> Result<(), AuthError> {
        self.slots().remove(slot);
        Ok(())
    }
}

pub fn project_dirs() -> Result<ProjectDirs, AuthError> {
    ProjectDirs::from("com", "appauth", "appauth")
        .ok_or_else(|| AuthError::Config("Could not determine project directories".into()))
}

pub fn data_dir() -> Result<PathBuf, AuthError> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_roundtrip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nested"));

        assert_eq!(store.load(AUTH_STATE_SLOT).unwrap(), None);
        store.save(AUTH_STATE_SLOT, r#"{"accessToken":"abc"}"#).unwrap();
        assert_eq!(
            store.load(AUTH_STATE_SLOT).unwrap().as_deref(),
            Some(r#"{"accessToken":"abc"}"#)
        );

        store.save(AUTH_STATE_SLOT, r#"{"accessToken":"xyz"}"#).unwrap();
        assert_eq!(
            store.load(AUTH_STATE_SLOT).unwrap().as_deref(),
            Some(r#"{"accessToken":"xyz"}"#)
        );
        assert!(!store.dir().join("auth_state.json.tmp").exists());

        store.remove(AUTH_STATE_SLOT).unwrap();
        store.remove(AUTH_STATE_SLOT).unwrap();
        assert_eq!(store.load(AUTH_STATE_SLOT).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        store.save(AUTH_STATE_SLOT, "{}").unwrap();

        let mode = fs::metadata(dir.path().join("auth_state.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn leftover_temp_file_is_replaced_not_reused() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("auth_state.json.tmp");
        fs::write(&tmp, "stale").unwrap();
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileStateStore::new(dir.path());
        store.save(AUTH_STATE_SLOT, r#"{"accessToken":"abc"}"#).unwrap();

        assert!(!tmp.exists());
        let path = dir.path().join("auth_state.json");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
        assert_eq!(fs::read_to_string(path).unwrap(), r#"{"accessToken":"abc"}"#);
    }

    #[test]
    fn memory_store_slots_are_independent() {
        let store = MemoryStateStore::new();
        store.save("a", "1").unwrap();
        store.save("b", "2").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.load("a").unwrap(), None);
        assert_eq!(store.load("b").unwrap().as_deref(), Some("2"));
    }
}
