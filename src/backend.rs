//! Backend contract: supplies the engine and state handle for an operation

use anyhow::Result;
use statekit::StateHandle;

use crate::engine::{Engine, HookRegistry};
use crate::operation::{ModuleTree, Operation};

/// What an apply runs against
pub struct OperationContext {
    pub engine: Box<dyn Engine>,
    pub state: Box<dyn StateHandle>,
}

/// Builds the engine and state handle for an operation
///
/// The engine must notify `hooks` as it applies; the registry may gain or
/// lose hooks between operations, so engines should keep the clone rather
/// than copy its contents.
pub trait Backend: Send + Sync {
    fn context(
        &self,
        op: &Operation,
        module: &ModuleTree,
        hooks: &HookRegistry,
    ) -> Result<OperationContext>;
}
