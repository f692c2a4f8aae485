//! Observers notified by the engine while it applies

use statekit::{State, StateHandle};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Kind of mutation reported to hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Create,
    Update,
    Delete,
}

/// Receives notifications from the engine
///
/// Called from the apply worker thread.
pub trait Hook: Send + Sync {
    /// A resource operation finished; `error` is set if it failed
    fn post_apply(&self, _address: &str, _action: HookAction, _error: Option<&str>) {}

    /// The in-memory state changed
    fn post_state_update(&self, _state: &Arc<State>) {}
}

// ============================================================================
// Registry
// ============================================================================

type Entry = (u64, Arc<dyn Hook>);

/// Shared list of hooks the engine notifies
///
/// Cloning yields another handle to the same list. Registration is scoped:
/// [`HookRegistry::register`] returns a guard that removes exactly those
/// hooks when dropped, leaving anything registered earlier in place.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Arc<RwLock<Vec<Entry>>>,
    next_id: Arc<AtomicU64>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register hooks until the returned guard is dropped
    #[must_use = "hooks are unregistered when the guard is dropped"]
    pub fn register(&self, hooks: Vec<Arc<dyn Hook>>) -> HookGuard {
        let mut ids = Vec::with_capacity(hooks.len());
        let mut list = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            ids.push(id);
            list.push((id, hook));
        }
        HookGuard {
            registry: self.clone(),
            ids,
        }
    }

    /// Number of registered hooks
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no hooks are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tell every hook a resource operation finished
    pub fn notify_apply(&self, address: &str, action: HookAction, error: Option<&str>) {
        for hook in self.snapshot() {
            hook.post_apply(address, action, error);
        }
    }

    /// Tell every hook the state changed
    pub fn notify_state(&self, state: &Arc<State>) {
        for hook in self.snapshot() {
            hook.post_state_update(state);
        }
    }

    // Hooks run without the lock held so they may register hooks themselves.
    fn snapshot(&self) -> Vec<Arc<dyn Hook>> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect()
    }

    fn remove(&self, ids: &[u64]) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| !ids.contains(id));
    }
}

/// Unregisters its hooks on drop
pub struct HookGuard {
    registry: HookRegistry,
    ids: Vec<u64>,
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.ids);
    }
}

// ============================================================================
// Counting and State Hooks
// ============================================================================

/// Added/changed/removed counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTally {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
}

/// Counts successful creates, updates and deletes
#[derive(Debug, Default)]
pub struct CountHook {
    added: AtomicUsize,
    changed: AtomicUsize,
    removed: AtomicUsize,
}

impl CountHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts so far
    pub fn tally(&self) -> ChangeTally {
        ChangeTally {
            added: self.added.load(Ordering::SeqCst),
            changed: self.changed.load(Ordering::SeqCst),
            removed: self.removed.load(Ordering::SeqCst),
        }
    }
}

impl Hook for CountHook {
    fn post_apply(&self, address: &str, action: HookAction, error: Option<&str>) {
        if let Some(err) = error {
            log::debug!("{address}: {action:?} failed, not counted: {err}");
            return;
        }

        let counter = match action {
            HookAction::Create => &self.added,
            HookAction::Update => &self.changed,
            HookAction::Delete => &self.removed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Keeps the latest state snapshot seen during apply
///
/// Once a handle is attached, every update is also staged to it with
/// [`StateHandle::write_state`], so the handle holds partial progress even
/// if the apply never returns a final state.
#[derive(Default)]
pub struct StateHook {
    latest: Mutex<Option<Arc<State>>>,
    handle: Mutex<Option<Arc<dyn StateHandle>>>,
}

impl StateHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage later updates to `handle`
    pub fn attach(&self, handle: Arc<dyn StateHandle>) {
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Latest snapshot, if any update arrived
    pub fn latest(&self) -> Option<Arc<State>> {
        self.guard().clone()
    }

    fn guard(&self) -> MutexGuard<'_, Option<Arc<State>>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Hook for StateHook {
    fn post_state_update(&self, state: &Arc<State>) {
        *self.guard() = Some(Arc::clone(state));

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handle) = handle
            && let Err(e) = handle.write_state(state)
        {
            log::warn!("Failed to stage state update (serial {}): {e}", state.serial);
        }
    }
}
