//! Error types for apply operations.
//!
//! Errors follow the order an apply runs in: precondition, coordination
//! (locking), execution (refresh/plan/apply), persistence, and release.
//! Release failures never replace another error; they are appended to it.

use thiserror::Error;

use crate::lock::LockError;
use crate::persist::PersistError;

/// Shown when an apply has neither a plan nor any configuration.
pub const APPLY_ERR_NO_CONFIG: &str = r"
No configuration files found!

Apply requires configuration to be present. Applying without a configuration
would mark everything for destruction, which is normally not what is desired.
If you would like to destroy everything, please run 'terraform destroy' instead
which does not require any configuration files.
";

/// Terminal error of an apply operation
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Nothing to apply and not a destroy
    #[error("{}", APPLY_ERR_NO_CONFIG.trim())]
    NoConfiguration,

    /// The backend could not set up the engine or state handle
    #[error("{0:#}")]
    Context(anyhow::Error),

    /// The state lock could not be acquired
    #[error("Error locking state: {0}")]
    Lock(#[source] LockError),

    /// Refresh before planning failed
    #[error("Error refreshing state: {0:#}")]
    Refresh(anyhow::Error),

    /// Planning failed
    #[error("Error running plan: {0:#}")]
    Plan(anyhow::Error),

    /// Execution failed after the resulting state was saved
    #[error(
        "Error applying plan:\n\n{0:#}\n\n\
         Terraform does not automatically rollback in the face of errors.\n\
         Instead, your Terraform state file has been partially updated with\n\
         any resources that successfully completed. Please address the error\n\
         above and apply again to incrementally change your infrastructure."
    )]
    Apply(anyhow::Error),

    /// The resulting state could not be saved to the backend
    #[error("{0}")]
    Persist(#[source] PersistError),

    /// The state lock could not be released
    #[error("{0}")]
    Release(#[source] LockError),

    /// Several errors, in the order they happened
    #[error("{}", format_multiple(.0))]
    Multiple(Vec<ApplyError>),
}

impl ApplyError {
    /// Append `next` to an optional existing error, keeping both
    pub fn combine(existing: Option<Self>, next: Self) -> Self {
        match existing {
            None => next,
            Some(Self::Multiple(mut errors)) => {
                errors.push(next);
                Self::Multiple(errors)
            }
            Some(err) => Self::Multiple(vec![err, next]),
        }
    }

    /// Every individual error, with aggregates flattened
    pub fn errors(&self) -> Vec<&ApplyError> {
        match self {
            Self::Multiple(errors) => errors.iter().flat_map(ApplyError::errors).collect(),
            other => vec![other],
        }
    }

    /// Whether a lock release failure is part of this error
    pub fn has_release_failure(&self) -> bool {
        self.errors()
            .iter()
            .any(|e| matches!(e, ApplyError::Release(_)))
    }

    /// The persistence failure, if the state could not be saved
    pub fn persist_error(&self) -> Option<&PersistError> {
        self.errors().into_iter().find_map(|e| match e {
            ApplyError::Persist(p) => Some(p),
            _ => None,
        })
    }
}

fn format_multiple(errors: &[ApplyError]) -> String {
    let noun = if errors.len() == 1 { "error" } else { "errors" };
    let mut out = format!("{} {noun} occurred:\n", errors.len());
    for err in errors {
        let text = err.to_string().replace('\n', "\n\t  ");
        out.push_str(&format!("\t* {text}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_no_configuration_message() {
        let text = ApplyError::NoConfiguration.to_string();
        assert!(text.starts_with("No configuration files found!"));
        assert!(text.contains("please run 'terraform destroy' instead"));
        assert!(!text.ends_with('\n'));
    }

    #[test]
    fn test_apply_error_explains_no_rollback() {
        let text = ApplyError::Apply(anyhow!("provider exploded")).to_string();
        assert!(text.starts_with("Error applying plan:\n\nprovider exploded\n\n"));
        assert!(text.contains("does not automatically rollback"));
        assert!(text.contains("partially updated"));
    }

    #[test]
    fn test_wrapped_phase_errors() {
        assert_eq!(
            ApplyError::Refresh(anyhow!("timeout")).to_string(),
            "Error refreshing state: timeout"
        );
        assert_eq!(
            ApplyError::Plan(anyhow!("cycle")).to_string(),
            "Error running plan: cycle"
        );
    }

    #[test]
    fn test_combine_keeps_both_errors() {
        let first = ApplyError::Plan(anyhow!("cycle"));
        let combined = ApplyError::combine(Some(first), ApplyError::NoConfiguration);

        assert_eq!(combined.errors().len(), 2);
        let text = combined.to_string();
        assert!(text.starts_with("2 errors occurred:"));
        assert!(text.contains("Error running plan: cycle"));
        assert!(text.contains("No configuration files found!"));
    }

    #[test]
    fn test_combine_with_nothing_is_identity() {
        let err = ApplyError::combine(None, ApplyError::NoConfiguration);
        assert!(matches!(err, ApplyError::NoConfiguration));
    }

    #[test]
    fn test_combine_flattens_into_existing_aggregate() {
        let two = ApplyError::combine(
            Some(ApplyError::Plan(anyhow!("a"))),
            ApplyError::Refresh(anyhow!("b")),
        );
        let three = ApplyError::combine(Some(two), ApplyError::NoConfiguration);
        match three {
            ApplyError::Multiple(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }
}
