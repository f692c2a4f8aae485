use std::sync::Arc;

use crate::error::Result;
use crate::types::{LockId, LockInfo, State};

pub mod local;
pub mod memory;

/// Advisory lock over a state handle
///
/// `lock` is a single non-blocking attempt: contention must be reported as
/// [`crate::Error::LockHeld`] so callers can decide whether to wait.
pub trait Locker: Send + Sync {
    /// Try to take the lock, annotated with `info`
    fn lock(&self, info: &LockInfo) -> Result<LockId>;

    /// Release a lock previously returned by [`Locker::lock`]
    ///
    /// Releasing a lock that is no longer held must succeed.
    fn unlock(&self, id: &LockId) -> Result<()>;
}

/// A lockable, two-phase state store
///
/// This trait abstracts where state lives, allowing us to:
/// - Keep state in a local file
/// - Keep state in memory for embedding and tests
/// - Plug in remote stores behind the same contract
pub trait StateHandle: Locker {
    /// Most recently written snapshot, if any
    fn state(&self) -> Option<Arc<State>>;

    /// Stage a snapshot
    fn write_state(&self, state: &Arc<State>) -> Result<()>;

    /// Commit the staged snapshot durably
    fn persist_state(&self) -> Result<()>;
}
