//! Execution engine contract
//!
//! The engine walks the plan and mutates real resources. The orchestrator
//! only drives it:
//! 1. Refresh - Update state from the live system (optional)
//! 2. Plan - Compute what to change (when no plan was supplied)
//! 3. Apply - Make the changes, stopping early if asked to

use anyhow::Result;
use statekit::State;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::operation::Plan;

pub mod hooks;

pub use hooks::{ChangeTally, CountHook, Hook, HookAction, HookGuard, HookRegistry, StateHook};

/// Cooperative stop signal handed to [`Engine::apply`]
///
/// Engines check it at safe points between resource operations and return
/// once they see it. Stopping never interrupts an operation mid-way.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the engine to stop. Non-blocking, idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// The plan/graph-walking engine that changes managed resources
///
/// `apply` runs on a worker thread while the orchestrator may call
/// `current_state` or stop the token from another.
pub trait Engine: Send + Sync {
    /// Update state from the live system
    fn refresh(&self) -> Result<Arc<State>>;

    /// Compute the changes needed
    fn plan(&self) -> Result<Plan>;

    /// Make the changes; return early once `stop` is set
    fn apply(&self, stop: &StopToken) -> Result<Arc<State>>;

    /// Latest snapshot, valid at any time including mid-apply and after a stop
    fn current_state(&self) -> Arc<State>;
}
