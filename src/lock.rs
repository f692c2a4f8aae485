//! State lock client
//!
//! Wraps a [`Locker`]'s single-attempt lock with waiting: while another
//! operation holds the lock, attempts repeat with a doubling delay until the
//! context is done.

use statekit::{LockId, LockInfo, Locker};
use std::time::Duration;
use thiserror::Error;

use crate::context::{Context, ContextError};

/// Delays between lock attempts while the lock is held elsewhere
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetry {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound for the delay
    pub max_delay: Duration,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
        }
    }
}

/// Shortest wait between attempts, whatever the configuration says
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(5);

impl LockRetry {
    /// Delay before attempt `attempt + 1` (0-indexed), never below [`MIN_RETRY_DELAY`]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
            .max(MIN_RETRY_DELAY)
    }
}

/// Errors from acquiring or releasing the state lock
#[derive(Debug, Error)]
pub enum LockError {
    /// Held by someone else and there was no time to wait
    #[error("state is locked by another operation\n\n{info}")]
    Held {
        /// The current holder
        info: Box<LockInfo>,
    },

    /// Still held by someone else when the timeout expired
    #[error("{}", timeout_message(.held_by.as_deref()))]
    Timeout {
        /// The holder seen on the last attempt
        held_by: Option<Box<LockInfo>>,
    },

    /// The operation was cancelled while waiting
    #[error("cancelled while waiting for the state lock")]
    Cancelled,

    /// The backend failed for a reason other than contention
    #[error("{0}")]
    Backend(#[source] statekit::Error),

    /// The lock could not be released
    #[error("Error releasing the state lock: {source}")]
    Release {
        /// Id of the lock that stayed held
        id: LockId,
        #[source]
        source: statekit::Error,
    },
}

impl LockError {
    /// The holder's annotation, when the lock was contended
    pub fn holder(&self) -> Option<&LockInfo> {
        match self {
            Self::Held { info } => Some(info),
            Self::Timeout { held_by } => held_by.as_deref(),
            _ => None,
        }
    }
}

fn timeout_message(held_by: Option<&LockInfo>) -> String {
    match held_by {
        Some(info) => format!("timeout while waiting for the state lock\n\n{info}"),
        None => "timeout while waiting for the state lock".to_string(),
    }
}

/// Acquire the lock, waiting while it is held until `ctx` is done
pub fn acquire(
    ctx: &Context,
    locker: &dyn Locker,
    info: &LockInfo,
    retry: &LockRetry,
) -> Result<LockId, LockError> {
    let mut attempt = 0u32;

    loop {
        let held = match locker.lock(info) {
            Ok(id) => {
                log::info!("Acquired state lock {id} for {}", info.operation);
                return Ok(id);
            }
            Err(statekit::Error::LockHeld { info }) => info,
            Err(e) => return Err(LockError::Backend(e)),
        };

        log::debug!(
            "State lock held by {} ({}), attempt {}",
            held.who,
            held.id,
            attempt + 1
        );

        let waited = match ctx.err() {
            None => ctx.sleep(retry.delay_for_attempt(attempt)),
            Some(reason) => Err(reason),
        };

        match waited {
            Ok(()) => attempt += 1,
            Err(ContextError::DeadlineExceeded) if attempt == 0 => {
                return Err(LockError::Held { info: held });
            }
            Err(ContextError::DeadlineExceeded) => {
                return Err(LockError::Timeout {
                    held_by: Some(held),
                });
            }
            Err(ContextError::Cancelled) => return Err(LockError::Cancelled),
        }
    }
}

/// Release a lock taken with [`acquire`]
pub fn release(locker: &dyn Locker, id: &LockId) -> Result<(), LockError> {
    locker.unlock(id).map_err(|source| LockError::Release {
        id: id.clone(),
        source,
    })?;
    log::info!("Released state lock {id}");
    Ok(())
}
