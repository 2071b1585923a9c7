//! Persisted boolean flags that survive restarts (the local-storage analogue).
//!
//! Only one key is used today: [`DISCONNECT_FLAG`], recording that the user
//! explicitly disconnected so the next start does not silently reconnect.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::errors::DashboardError;

pub const DISCONNECT_FLAG: &str = "wallet_disconnected";

const FLAGS_FILE: &str = "flags.json";

pub trait FlagStore: Send + Sync {
    fn is_set(&self, key: &str) -> Result<bool, DashboardError>;
    fn set(&self, key: &str) -> Result<(), DashboardError>;
    fn clear(&self, key: &str) -> Result<(), DashboardError>;
}

// ─────────────────────────────────────────────────────────
// File-backed store
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct FlagFile {
    #[serde(default)]
    flags: BTreeMap<String, DateTime<Utc>>,
}

/// JSON file under the state directory. Every write replaces the file through
/// a temp file + rename so a crash never leaves half a document behind.
pub struct FileFlagStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileFlagStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(FLAGS_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<FlagFile, DashboardError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(FlagFile::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| DashboardError::Storage {
                message: format!("{}: {e}", self.path.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FlagFile::default()),
            Err(e) => Err(storage_err(&self.path, e)),
        }
    }

    fn store(&self, file: &FlagFile) -> Result<(), DashboardError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| storage_err(dir, e))?;
        }
        let body = serde_json::to_vec_pretty(file).map_err(|e| DashboardError::Storage {
            message: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(|e| storage_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| storage_err(&self.path, e))
    }
}

impl FlagStore for FileFlagStore {
    fn is_set(&self, key: &str) -> Result<bool, DashboardError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.load()?.flags.contains_key(key))
    }

    fn set(&self, key: &str) -> Result<(), DashboardError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = self.load()?;
        file.flags.insert(key.to_string(), Utc::now());
        debug!(key, path = %self.path.display(), "flag set");
        self.store(&file)
    }

    fn clear(&self, key: &str) -> Result<(), DashboardError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = self.load()?;
        if file.flags.remove(key).is_none() {
            return Ok(());
        }
        debug!(key, path = %self.path.display(), "flag cleared");
        self.store(&file)
    }
}

fn storage_err(path: &Path, e: std::io::Error) -> DashboardError {
    DashboardError::Storage {
        message: format!("{}: {e}", path.display()),
    }
}

// ─────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────

/// Process-lifetime store, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryFlagStore {
    flags: Mutex<HashMap<String, bool>>,
}

impl FlagStore for MemoryFlagStore {
    fn is_set(&self, key: &str) -> Result<bool, DashboardError> {
        let flags = self.flags.lock().unwrap_or_else(|p| p.into_inner());
        Ok(flags.get(key).copied().unwrap_or(false))
    }

    fn set(&self, key: &str) -> Result<(), DashboardError> {
        let mut flags = self.flags.lock().unwrap_or_else(|p| p.into_inner());
        flags.insert(key.to_string(), true);
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), DashboardError> {
        let mut flags = self.flags.lock().unwrap_or_else(|p| p.into_inner());
        flags.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_flag_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileFlagStore::new(dir.path());
        assert!(!store.is_set(DISCONNECT_FLAG).unwrap());

        store.set(DISCONNECT_FLAG).unwrap();
        drop(store);

        let reopened = FileFlagStore::new(dir.path());
        assert!(reopened.is_set(DISCONNECT_FLAG).unwrap());

        reopened.clear(DISCONNECT_FLAG).unwrap();
        assert!(!FileFlagStore::new(dir.path()).is_set(DISCONNECT_FLAG).unwrap());
    }

    #[test]
    fn test_file_store_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileFlagStore::new(&nested);
        store.set(DISCONNECT_FLAG).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FLAGS_FILE), b"{not json").unwrap();
        let store = FileFlagStore::new(dir.path());
        assert!(matches!(
            store.is_set(DISCONNECT_FLAG),
            Err(DashboardError::Storage { .. })
        ));
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryFlagStore::default();
        store.set("k").unwrap();
        assert!(store.is_set("k").unwrap());
        store.clear("k").unwrap();
        assert!(!store.is_set("k").unwrap());
    }
}
