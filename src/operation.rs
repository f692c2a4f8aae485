//! Operation input and the running-operation record

use serde::{Deserialize, Serialize};
use statekit::State;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ApplyError;

// ============================================================================
// Plan and Module Tree
// ============================================================================

/// What a planned change does to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Resource will be created
    Create,
    /// Resource will be updated in place
    Update,
    /// Resource will be destroyed
    Delete,
    /// Nothing to do
    NoOp,
}

/// A single planned change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    /// Resource address, e.g. "aws_instance.web"
    pub address: String,
    /// What will happen to it
    pub action: ChangeAction,
}

/// A precomputed description of intended changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub changes: Vec<PlannedChange>,
}

impl Plan {
    /// Create an empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a change
    pub fn with_change(mut self, address: impl Into<String>, action: ChangeAction) -> Self {
        self.changes.push(PlannedChange {
            address: address.into(),
            action,
        });
        self
    }

    /// Whether the plan changes nothing
    pub fn is_empty(&self) -> bool {
        self.changes.iter().all(|c| c.action == ChangeAction::NoOp)
    }

    /// Count of (create, update, delete) actions
    pub fn summary(&self) -> (usize, usize, usize) {
        self.changes
            .iter()
            .fold((0, 0, 0), |(add, change, remove), c| match c.action {
                ChangeAction::Create => (add + 1, change, remove),
                ChangeAction::Update => (add, change + 1, remove),
                ChangeAction::Delete => (add, change, remove + 1),
                ChangeAction::NoOp => (add, change, remove),
            })
    }
}

/// A resolved tree of configuration modules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleTree {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub children: Vec<ModuleTree>,
}

impl ModuleTree {
    /// The root module with no configuration at all
    pub fn empty() -> Self {
        Self {
            name: "root".to_string(),
            resources: Vec::new(),
            children: Vec::new(),
        }
    }

    /// A root module declaring `resources`
    pub fn with_resources<I, S>(resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resources: resources.into_iter().map(Into::into).collect(),
            ..Self::empty()
        }
    }

    /// Whether this tree declares no resources anywhere
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.children.iter().all(ModuleTree::is_empty)
    }
}

// ============================================================================
// Operation
// ============================================================================

/// Kind of operation, recorded on the state lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationType {
    #[default]
    Apply,
    Plan,
    Refresh,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Apply => write!(f, "OperationTypeApply"),
            OperationType::Plan => write!(f, "OperationTypePlan"),
            OperationType::Refresh => write!(f, "OperationTypeRefresh"),
        }
    }
}

/// An apply request. Never modified by the orchestrator.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Precomputed plan; when absent the orchestrator plans first
    pub plan: Option<Plan>,
    /// Configuration to apply
    pub module: Option<ModuleTree>,
    /// Destroy everything tracked in state
    pub destroy: bool,
    /// Refresh live state before planning
    pub plan_refresh: bool,
    /// Lock the state for the duration of the operation
    pub lock_state: bool,
    /// How long to wait for the state lock
    pub state_lock_timeout: Duration,
    /// Kind of operation, for lock annotation
    pub kind: OperationType,
}

impl Default for Operation {
    fn default() -> Self {
        Self {
            plan: None,
            module: None,
            destroy: false,
            plan_refresh: false,
            lock_state: false,
            state_lock_timeout: Duration::ZERO,
            kind: OperationType::Apply,
        }
    }
}

impl Operation {
    /// An apply with no plan and no configuration yet
    pub fn apply() -> Self {
        Self::default()
    }

    /// A destroy operation
    pub fn destroy() -> Self {
        Self {
            destroy: true,
            ..Self::default()
        }
    }

    /// Use a precomputed plan
    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Apply the given configuration
    pub fn with_module(mut self, module: ModuleTree) -> Self {
        self.module = Some(module);
        self
    }

    /// Lock the state, waiting up to `timeout` for it
    pub fn with_lock(mut self, timeout: Duration) -> Self {
        self.lock_state = true;
        self.state_lock_timeout = timeout;
        self
    }

    /// Refresh before planning
    pub fn with_refresh(mut self) -> Self {
        self.plan_refresh = true;
        self
    }

    /// Whether there is nothing to apply: no plan, no configuration, not a destroy
    pub fn has_no_configuration(&self) -> bool {
        self.plan.is_none() && self.module.is_none() && !self.destroy
    }
}

// ============================================================================
// Summary and Running Operation
// ============================================================================

/// Counts reported when an apply completes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
    pub destroy: bool,
}

impl ApplySummary {
    /// Whether anything was added or changed
    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.changed > 0
    }
}

impl fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.destroy {
            write!(f, "Destroy complete! Resources: {} destroyed.", self.removed)
        } else {
            write!(
                f,
                "Apply complete! Resources: {} added, {} changed, {} destroyed.",
                self.added, self.changed, self.removed
            )
        }
    }
}

/// The caller-visible record of an apply in progress or finished
#[derive(Debug, Default)]
pub struct RunningOperation {
    /// Newest known snapshot, kept current even when the apply fails
    pub state: Option<Arc<State>>,
    /// Terminal error, if any
    pub err: Option<ApplyError>,
    /// Completion counts, set on success
    pub summary: Option<ApplySummary>,
}

impl RunningOperation {
    pub fn new() -> Self {
        Self::default()
    }

    /// The outcome as a `Result`
    pub fn result(&self) -> Result<Option<&ApplySummary>, &ApplyError> {
        match &self.err {
            Some(err) => Err(err),
            None => Ok(self.summary.as_ref()),
        }
    }
}
