//! State kept in a file on local disk

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Locker, StateHandle};
use crate::codec::{JsonCodec, StateCodec};
use crate::error::{Error, Result};
use crate::types::{LockId, LockInfo, State};

/// File-backed state handle.
///
/// `write_state` writes the file immediately, so `persist_state` has nothing
/// left to do. Locking creates a `.<name>.lock.info` file next to the state
/// file that records who holds the lock.
pub struct LocalState {
    path: PathBuf,
    codec: Arc<dyn StateCodec>,
    written: Mutex<Option<Arc<State>>>,
}

impl LocalState {
    /// Handle for the state file at `path`, encoded as JSON
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_codec(path, Arc::new(JsonCodec))
    }

    /// Handle for the state file at `path` using a custom codec
    pub fn with_codec(path: impl Into<PathBuf>, codec: Arc<dyn StateCodec>) -> Self {
        Self {
            path: path.into(),
            codec,
            written: Mutex::new(None),
        }
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the lock info file
    pub fn lock_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "terraform.tfstate".to_string());
        self.path.with_file_name(format!(".{name}.lock.info"))
    }

    /// Load the state file from disk
    pub fn read(&self) -> Result<State> {
        let bytes = fs::read(&self.path).map_err(|source| Error::StateFile {
            path: self.path.clone(),
            source,
        })?;
        self.codec.decode(&bytes)
    }

    fn written(&self) -> MutexGuard<'_, Option<Arc<State>>> {
        self.written.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // The holder may still be writing its info, or may have just released;
    // either way the lock counts as held for this attempt.
    fn current_holder(&self) -> LockInfo {
        match self.read_lock_info() {
            Ok(Some(held)) => held,
            Ok(None) => self.unknown_holder("lock was released while reading it"),
            Err(e) => self.unknown_holder(&format!("lock info unreadable: {e}")),
        }
    }

    fn unknown_holder(&self, reason: &str) -> LockInfo {
        let mut info = LockInfo::new("unknown").with_info(reason);
        info.id = String::new();
        info.who = "unknown".to_string();
        info.version = String::new();
        info.path = self.path.display().to_string();
        info
    }

    fn read_lock_info(&self) -> Result<Option<LockInfo>> {
        match fs::read(self.lock_path()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Locker for LocalState {
    fn lock(&self, info: &LockInfo) -> Result<LockId> {
        let mut info = info.clone();
        info.path = self.path.display().to_string();

        let lock_path = self.lock_path();
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::LockHeld {
                    info: Box::new(self.current_holder()),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let written = serde_json::to_vec(&info)
            .map_err(Error::from)
            .and_then(|bytes| {
                file.write_all(&bytes)?;
                file.sync_all()?;
                Ok(())
            });
        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&lock_path) {
                log::warn!(
                    "Failed to remove partial lock file {}: {cleanup}",
                    lock_path.display()
                );
            }
            return Err(e);
        }

        log::debug!("Locked {} ({})", self.path.display(), info.id);
        Ok(info.lock_id())
    }

    fn unlock(&self, id: &LockId) -> Result<()> {
        let Some(held) = self.read_lock_info()? else {
            log::debug!("Unlock of {}: no lock held", self.path.display());
            return Ok(());
        };

        if held.id != id.as_str() {
            return Err(Error::LockIdMismatch {
                given: id.to_string(),
                held: held.id,
            });
        }

        match fs::remove_file(self.lock_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        log::debug!("Unlocked {} ({id})", self.path.display());
        Ok(())
    }
}

impl StateHandle for LocalState {
    fn state(&self) -> Option<Arc<State>> {
        self.written().clone()
    }

    fn write_state(&self, state: &Arc<State>) -> Result<()> {
        let bytes = self.codec.encode(state)?;
        fs::write(&self.path, bytes).map_err(|source| Error::StateFile {
            path: self.path.clone(),
            source,
        })?;

        *self.written() = Some(Arc::clone(state));
        log::debug!("Wrote state to {}", self.path.display());
        Ok(())
    }

    fn persist_state(&self) -> Result<()> {
        Ok(())
    }
}
