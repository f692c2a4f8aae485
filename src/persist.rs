//! State persistence with recovery fallbacks
//!
//! After an apply the resulting state must end up somewhere. If the backend
//! rejects it, the state is written to a local backup file; if that fails too
//! it is printed to the console; only if it cannot even be encoded is it lost.

use statekit::{LocalState, State, StateCodec, StateHandle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::ui::Ui;

/// File the state is backed up to when the backend cannot take it
pub const BACKUP_STATE_FILE: &str = "errored.tfstate";

pub const STATE_WRITE_BACKED_UP_ERROR: &str = r#"Failed to persist state to backend.

The error shown above has prevented Terraform from writing the updated state
to the configured backend. To allow for recovery, the state has been written
to the file "errored.tfstate" in the current working directory.

Running "terraform apply" again at this point will create a forked state,
making it harder to recover.

To retry writing this state, use the following command:
    terraform state push errored.tfstate
"#;

pub const STATE_WRITE_CONSOLE_FALLBACK_ERROR: &str = r"Failed to persist state to backend.

The errors shown above prevented Terraform from writing the updated state to
the configured backend and from creating a local backup file. As a fallback,
the raw state data is printed above as a JSON object.

To retry writing this state, copy the state data (from the first { to the
last } inclusive) and save it into a local file called errored.tfstate, then
run the following command:
    terraform state push errored.tfstate
";

pub const STATE_WRITE_FATAL_ERROR: &str = r"Failed to save state after apply.

A catastrophic error has prevented Terraform from persisting the state file
or creating a backup. Unfortunately this means that the record of any resources
created during this apply has been lost, and such resources may exist outside
of Terraform's management.

For resources that support import, it is possible to recover by manually
importing each resource using its id from the target system.

This is a serious bug in Terraform and should be reported.
";

/// The backend could not persist the state; says where the state went instead
///
/// Messages are the literal recovery instructions shown to operators.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Saved to the local backup file
    #[error("{}", STATE_WRITE_BACKED_UP_ERROR)]
    BackedUp {
        /// Where the backup was written
        path: PathBuf,
        /// Why the backend failed
        #[source]
        cause: statekit::Error,
    },

    /// Printed to the console
    #[error("{}", STATE_WRITE_CONSOLE_FALLBACK_ERROR)]
    ConsoleFallback {
        #[source]
        cause: statekit::Error,
        /// Why the backup file could not be written
        backup: statekit::Error,
    },

    /// Lost
    #[error("{}", STATE_WRITE_FATAL_ERROR)]
    Fatal {
        #[source]
        cause: statekit::Error,
        backup: statekit::Error,
        /// Why the state could not be encoded
        encode: statekit::Error,
    },
}

impl PersistError {
    /// The backend failure that started the fallback chain
    pub fn cause(&self) -> &statekit::Error {
        match self {
            Self::BackedUp { cause, .. }
            | Self::ConsoleFallback { cause, .. }
            | Self::Fatal { cause, .. } => cause,
        }
    }

    /// Whether the state survived somewhere the operator can recover it from
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Fatal { .. })
    }
}

/// Where and how to save state when the backend fails
pub struct Recovery<'a> {
    pub ui: &'a dyn Ui,
    pub backup_dir: &'a Path,
    pub codec: Arc<dyn StateCodec>,
}

impl Recovery<'_> {
    /// Full path of the backup file
    pub fn backup_path(&self) -> PathBuf {
        self.backup_dir.join(BACKUP_STATE_FILE)
    }
}

/// Write and commit `state` to `handle`, falling back to recovery on failure
pub fn persist(
    handle: &dyn StateHandle,
    state: &Arc<State>,
    recovery: &Recovery<'_>,
) -> Result<(), PersistError> {
    let saved = handle
        .write_state(state)
        .and_then(|()| handle.persist_state());

    match saved {
        Ok(()) => {
            log::info!("Persisted state (serial {})", state.serial);
            Ok(())
        }
        Err(cause) => Err(backup_state_for_error(state, cause, recovery)),
    }
}

fn backup_state_for_error(
    state: &Arc<State>,
    cause: statekit::Error,
    recovery: &Recovery<'_>,
) -> PersistError {
    log::error!("Failed to save state: {cause}");
    recovery.ui.error(&format!("Failed to save state: {cause}\n"));

    let path = recovery.backup_path();
    let local = LocalState::with_codec(&path, Arc::clone(&recovery.codec));
    let backup = match local.write_state(state) {
        Ok(()) => {
            log::warn!("State backed up to {}", path.display());
            return PersistError::BackedUp { path, cause };
        }
        Err(e) => e,
    };

    recovery.ui.error(&format!(
        "Also failed to create local state file for recovery: {backup}\n\n"
    ));

    // Last resort: print the state so the operator can save it by hand.
    match recovery.codec.encode_text(state) {
        Ok(text) => {
            recovery.ui.output(&text);
            PersistError::ConsoleFallback { cause, backup }
        }
        Err(encode) => {
            recovery.ui.error(&format!(
                "Also failed to JSON-serialize the state to print it: {encode}\n\n"
            ));
            PersistError::Fatal {
                cause,
                backup,
                encode,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BrokenCodec, FlakyHandle, sample_state};
    use crate::ui::MemoryUi;
    use statekit::{JsonCodec, MemoryState};
    use tempfile::TempDir;

    fn recovery<'a>(ui: &'a MemoryUi, dir: &'a Path) -> Recovery<'a> {
        Recovery {
            ui,
            backup_dir: dir,
            codec: Arc::new(JsonCodec),
        }
    }

    #[test]
    fn test_persist_success() {
        let dir = TempDir::new().unwrap();
        let ui = MemoryUi::new();
        let handle = MemoryState::new();
        let state = sample_state(2);

        persist(&handle, &state, &recovery(&ui, dir.path())).unwrap();

        assert_eq!(handle.committed(), Some(state));
        assert!(ui.errors().is_empty());
        assert!(!dir.path().join(BACKUP_STATE_FILE).exists());
    }

    #[test]
    fn test_persist_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ui = MemoryUi::new();
        let handle = FlakyHandle::healthy();
        let state = sample_state(1);

        persist(&handle, &state, &recovery(&ui, dir.path())).unwrap();
        persist(&handle, &state, &recovery(&ui, dir.path())).unwrap();

        assert_eq!(handle.writes(), 2);
        assert_eq!(handle.persists(), 2);
        assert_eq!(handle.state(), Some(state));
    }

    #[test]
    fn test_write_failure_backs_up_locally() {
        let dir = TempDir::new().unwrap();
        let ui = MemoryUi::new();
        let handle = FlakyHandle::failing_write();
        let state = sample_state(3);

        let err = persist(&handle, &state, &recovery(&ui, dir.path())).unwrap_err();

        assert!(matches!(err, PersistError::BackedUp { .. }));
        assert_eq!(err.to_string(), STATE_WRITE_BACKED_UP_ERROR);
        assert!(err.is_recoverable());
        assert_eq!(handle.persists(), 0);

        let backup = LocalState::new(dir.path().join(BACKUP_STATE_FILE));
        assert_eq!(backup.read().unwrap(), *state);
        assert!(ui.errors()[0].starts_with("Failed to save state:"));
        assert!(ui.outputs().is_empty());
    }

    #[test]
    fn test_persist_failure_backs_up_locally() {
        let dir = TempDir::new().unwrap();
        let ui = MemoryUi::new();
        let handle = FlakyHandle::failing_persist();

        let err = persist(&handle, &sample_state(1), &recovery(&ui, dir.path())).unwrap_err();
        assert!(matches!(err, PersistError::BackedUp { .. }));
        assert!(err.cause().to_string().contains("persist refused"));
    }

    #[test]
    fn test_backup_failure_prints_state() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        let ui = MemoryUi::new();
        let handle = FlakyHandle::failing_write();
        let state = sample_state(2);

        let err = persist(&handle, &state, &recovery(&ui, &missing)).unwrap_err();

        assert!(matches!(err, PersistError::ConsoleFallback { .. }));
        assert_eq!(err.to_string(), STATE_WRITE_CONSOLE_FALLBACK_ERROR);

        let printed = ui.outputs();
        assert_eq!(printed.len(), 1);
        let decoded: State = serde_json::from_str(&printed[0]).unwrap();
        assert_eq!(decoded, *state);

        let errors = ui.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors[1].starts_with("Also failed to create local state file"));
    }

    #[test]
    fn test_unencodable_state_is_fatal() {
        let dir = TempDir::new().unwrap();
        let ui = MemoryUi::new();
        let handle = FlakyHandle::failing_write();
        let recovery = Recovery {
            ui: &ui,
            backup_dir: dir.path(),
            codec: Arc::new(BrokenCodec),
        };

        let err = persist(&handle, &sample_state(1), &recovery).unwrap_err();

        assert!(matches!(err, PersistError::Fatal { .. }));
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), STATE_WRITE_FATAL_ERROR);
        assert!(ui.outputs().is_empty());
        assert_eq!(ui.errors().len(), 3);
        assert!(!dir.path().join(BACKUP_STATE_FILE).exists());
    }
}
