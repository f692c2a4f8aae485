//! In-process state handle

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Locker, StateHandle};
use crate::error::{Error, Result};
use crate::types::{LockId, LockInfo, State};

/// State held in memory, with a staged and a committed snapshot.
#[derive(Default)]
pub struct MemoryState {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    staged: Option<Arc<State>>,
    committed: Option<Arc<State>>,
    lock: Option<LockInfo>,
}

impl MemoryState {
    /// Empty handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle whose committed state is `state`
    pub fn with_state(state: Arc<State>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                staged: Some(Arc::clone(&state)),
                committed: Some(state),
                lock: None,
            }),
        }
    }

    /// Last committed snapshot
    pub fn committed(&self) -> Option<Arc<State>> {
        self.inner().committed.clone()
    }

    /// Current lock holder
    pub fn lock_info(&self) -> Option<LockInfo> {
        self.inner().lock.clone()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Locker for MemoryState {
    fn lock(&self, info: &LockInfo) -> Result<LockId> {
        let mut inner = self.inner();
        if let Some(held) = &inner.lock {
            return Err(Error::LockHeld {
                info: Box::new(held.clone()),
            });
        }

        let mut info = info.clone();
        info.path = "memory".to_string();
        let id = info.lock_id();
        inner.lock = Some(info);
        Ok(id)
    }

    fn unlock(&self, id: &LockId) -> Result<()> {
        let mut inner = self.inner();
        match &inner.lock {
            None => Ok(()),
            Some(held) if held.id == id.as_str() => {
                inner.lock = None;
                Ok(())
            }
            Some(held) => Err(Error::LockIdMismatch {
                given: id.to_string(),
                held: held.id.clone(),
            }),
        }
    }
}

impl StateHandle for MemoryState {
    fn state(&self) -> Option<Arc<State>> {
        self.inner().staged.clone()
    }

    fn write_state(&self, state: &Arc<State>) -> Result<()> {
        self.inner().staged = Some(Arc::clone(state));
        Ok(())
    }

    fn persist_state(&self) -> Result<()> {
        let mut inner = self.inner();
        let staged = inner.staged.clone().ok_or(Error::NothingToPersist)?;
        inner.committed = Some(staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceInstance;

    #[test]
    fn test_write_is_staged_until_persist() {
        let handle = MemoryState::new();
        let state = State::new()
            .with_resource("a", ResourceInstance::new("null", "1"))
            .into_shared();

        handle.write_state(&state).unwrap();
        assert_eq!(handle.state(), Some(Arc::clone(&state)));
        assert!(handle.committed().is_none());

        handle.persist_state().unwrap();
        assert_eq!(handle.committed(), Some(state));
    }

    #[test]
    fn test_persist_without_write_fails() {
        let handle = MemoryState::new();
        assert!(matches!(
            handle.persist_state(),
            Err(Error::NothingToPersist)
        ));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let handle = MemoryState::new();
        let id = handle.lock(&LockInfo::new("OperationTypeApply")).unwrap();

        let err = handle.lock(&LockInfo::new("OperationTypeApply")).unwrap_err();
        assert!(err.is_lock_held());

        assert!(handle.unlock(&LockId::new("other")).is_err());
        handle.unlock(&id).unwrap();
        handle.unlock(&id).unwrap();
        assert!(handle.lock_info().is_none());
    }
}
