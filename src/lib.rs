//! # tfapply
//!
//! Apply orchestration for infrastructure changes.
//!
//! Given a plan (or configuration to plan from), an [`Applier`] locks the
//! state, drives an external [`Engine`] on a worker thread, counts what it
//! changed, and saves the resulting state. If the backend refuses the state,
//! it falls back to a local `errored.tfstate` file and then to printing the
//! state, so partial progress is never silently lost.
//!
//! ## Core Concepts
//!
//! - **Backend**: supplies the engine and a lockable state handle per operation
//! - **Engine**: refreshes, plans and applies; stops cooperatively via a [`StopToken`]
//! - **Hooks**: observers the engine notifies; registration is scoped by a guard
//! - **RunningOperation**: the caller-visible outcome, including the newest state
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tfapply::{Applier, Context, ModuleTree, Operation, RunningOperation};
//!
//! let applier = Applier::new(Arc::new(my_backend));
//! let op = Operation::apply()
//!     .with_module(ModuleTree::with_resources(["null_resource.a"]))
//!     .with_lock(Duration::from_secs(30));
//!
//! let (ctx, cancel) = Context::background().with_cancel();
//! let mut running = RunningOperation::new();
//! applier.run_apply(&ctx, &op, &mut running);
//!
//! match running.result() {
//!     Ok(summary) => println!("{summary:?}"),
//!     Err(err) => eprintln!("{err}"),
//! }
//! ```

pub mod apply;
pub mod backend;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod lock;
pub mod logging;
pub mod operation;
pub mod persist;
pub mod ui;

#[cfg(test)]
pub(crate) mod test_support;

pub use apply::Applier;
pub use backend::{Backend, OperationContext};
pub use config::{ApplyConfig, ConfigError};
pub use context::{CancelHandle, Context, ContextError};
pub use engine::{Engine, Hook, HookAction, HookGuard, HookRegistry, StopToken};
pub use error::ApplyError;
pub use lock::{LockError, LockRetry};
pub use operation::{
    ApplySummary, ChangeAction, ModuleTree, Operation, OperationType, Plan, PlannedChange,
    RunningOperation,
};
pub use persist::PersistError;
pub use ui::{ConsoleUi, MemoryUi, Ui};
