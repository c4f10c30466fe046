use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use crate::app_dirs::AppDirs;

/// Key of the single crash-recovery slot.
pub const RECOVERY_KEY: &str = "current-session";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),
    #[error("storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Key/value storage for serialized sessions.
pub trait SessionStore {
    fn save(&self, key: &str, payload: &str) -> Result<(), StoreError>;
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new() -> Self {
        let dir = AppDirs::recovery_dir().unwrap_or_else(|| PathBuf::from("themetype_recovery"));
        Self { dir }
    }

    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl Default for FileSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, key: &str, payload: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        // write next to the target and rename so a crash never leaves half a snapshot
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, String>,
    quota_bytes: Option<usize>,
    unavailable: bool,
    saves: usize,
}

/// In-memory store with an optional byte quota.
///
/// Clones share contents, so a test can inspect what the session machine
/// wrote through its own handle.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    inner: Rc<RefCell<MemoryInner>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes across all keys the store will accept.
    pub fn with_quota(quota_bytes: usize) -> Self {
        let store = Self::default();
        store.inner.borrow_mut().quota_bytes = Some(quota_bytes);
        store
    }

    /// Every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.borrow_mut().unavailable = unavailable;
    }

    /// Successful saves so far
    pub fn save_count(&self) -> usize {
        self.inner.borrow().saves
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.borrow().entries.get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, payload: &str) {
        self.inner
            .borrow_mut()
            .entries
            .insert(key.to_string(), payload.to_string());
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, key: &str, payload: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        if let Some(quota) = inner.quota_bytes {
            let used: usize = inner
                .entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            let available = quota.saturating_sub(used);
            if payload.len() > available {
                return Err(StoreError::QuotaExceeded {
                    needed: payload.len(),
                    available,
                });
            }
        }
        inner.entries.insert(key.to_string(), payload.to_string());
        inner.saves += 1;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.borrow();
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(inner.entries.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        inner.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    #[test]
    fn file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::with_dir(dir.path().join("nested"));

        assert_eq!(store.load(RECOVERY_KEY).unwrap(), None);
        store.save(RECOVERY_KEY, "{\"a\":1}").unwrap();
        assert_eq!(store.load(RECOVERY_KEY).unwrap().as_deref(), Some("{\"a\":1}"));

        store.save(RECOVERY_KEY, "{}").unwrap();
        assert_eq!(store.load(RECOVERY_KEY).unwrap().as_deref(), Some("{}"));

        store.remove(RECOVERY_KEY).unwrap();
        assert_eq!(store.load(RECOVERY_KEY).unwrap(), None);
        // removing twice is fine
        store.remove(RECOVERY_KEY).unwrap();
    }

    #[test]
    fn file_store_sanitises_keys() {
        let store = FileSessionStore::with_dir("/tmp/x");
        assert_eq!(
            store.path_for("../etc/passwd"),
            PathBuf::from("/tmp/x/___etc_passwd.json")
        );
    }

    #[test]
    fn memory_store_enforces_quota() {
        let store = MemorySessionStore::with_quota(8);
        store.save("a", "12345").unwrap();
        // replacing a key frees its old bytes
        store.save("a", "12345678").unwrap();
        assert_matches!(
            store.save("b", "1"),
            Err(StoreError::QuotaExceeded { needed: 1, available: 0 })
        );
        assert_eq!(store.save_count(), 2);
    }

    #[test]
    fn memory_store_can_be_unavailable() {
        let store = MemorySessionStore::new();
        let handle = store.clone();
        store.save("k", "v").unwrap();

        handle.set_unavailable(true);
        assert_matches!(store.load("k"), Err(StoreError::Unavailable(_)));
        assert_matches!(store.save("k", "w"), Err(StoreError::Unavailable(_)));

        handle.set_unavailable(false);
        assert_eq!(store.load("k").unwrap().as_deref(), Some("v"));
    }
}
