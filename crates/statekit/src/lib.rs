//! # statekit
//!
//! State snapshots and lockable state handles for infrastructure apply tooling.
//!
//! ## Core Concepts
//!
//! - **State**: an immutable point-in-time record of tracked resources,
//!   shared as `Arc<State>` and replaced rather than mutated
//! - **StateHandle**: a two-phase store (`write_state` stages,
//!   `persist_state` commits) that is also a [`Locker`]
//! - **LockInfo**: who holds a lock and why, shown to anyone who contends for it
//! - **StateCodec**: how snapshots are turned into bytes
//!
//! ## Example
//!
//! ```no_run
//! use statekit::{LocalState, LockInfo, Locker, ResourceInstance, State, StateHandle};
//!
//! let handle = LocalState::new("terraform.tfstate");
//! let id = handle.lock(&LockInfo::new("OperationTypeApply")).expect("lock");
//!
//! let state = State::new()
//!     .with_resource("null_resource.a", ResourceInstance::new("null_resource", "1"))
//!     .into_shared();
//! handle.write_state(&state).expect("write");
//! handle.persist_state().expect("persist");
//!
//! handle.unlock(&id).expect("unlock");
//! ```
//!
//! ## Backends
//!
//! - [`LocalState`]: a state file on disk, locked with a sibling lock-info file
//! - [`MemoryState`]: in-process state for embedding and tests

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Lockable state handles.
pub mod backend;
/// Snapshot encoding.
pub mod codec;
/// Error types for state operations.
pub mod error;
/// Snapshot and lock types.
pub mod types;

pub use backend::local::LocalState;
pub use backend::memory::MemoryState;
pub use backend::{Locker, StateHandle};
pub use codec::{JsonCodec, StateCodec};
pub use error::{Error, Result};
pub use types::{LockId, LockInfo, ResourceInstance, STATE_VERSION, State};
