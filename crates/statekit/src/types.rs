//! Core types: state snapshots and lock annotations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Current state format version
pub const STATE_VERSION: u32 = 4;

// ============================================================================
// State Snapshot
// ============================================================================

/// A point-in-time record of every tracked resource.
///
/// Snapshots are immutable by replacement: mutation helpers return a new
/// snapshot with a bumped `serial`, so a snapshot shared as `Arc<State>` is
/// never observed half-updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// State format version
    pub version: u32,
    /// Incremented on every new snapshot
    pub serial: u64,
    /// Stable identifier for the history this snapshot belongs to
    pub lineage: String,
    /// Tracked resources keyed by address
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceInstance>,
}

/// A single tracked resource and its attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInstance {
    /// Resource type, e.g. "aws_instance"
    pub kind: String,
    /// Identifier in the target system
    pub id: String,
    /// Recorded attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ResourceInstance {
    /// Create a resource with no attributes
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl State {
    /// Create an empty state with a fresh lineage
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            resources: BTreeMap::new(),
        }
    }

    /// Wrap into a shareable snapshot reference
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Return a new snapshot with `address` set to `resource`
    pub fn with_resource(&self, address: impl Into<String>, resource: ResourceInstance) -> Self {
        let mut next = self.clone();
        next.resources.insert(address.into(), resource);
        next.serial += 1;
        next
    }

    /// Return a new snapshot without `address`
    pub fn without_resource(&self, address: &str) -> Self {
        let mut next = self.clone();
        next.resources.remove(address);
        next.serial += 1;
        next
    }

    /// Look up a resource by address
    pub fn resource(&self, address: &str) -> Option<&ResourceInstance> {
        self.resources.get(address)
    }

    /// Number of tracked resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether no resources are tracked
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Locks
// ============================================================================

/// Identifier returned by a successful lock, required to unlock
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockId(String);

impl LockId {
    /// Wrap a raw id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Annotation attached to a lock: who holds it, and why.
///
/// Surfaced to a second caller that finds the lock already held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique id for this lock
    #[serde(rename = "ID")]
    pub id: String,
    /// Operation that took the lock
    #[serde(rename = "Operation")]
    pub operation: String,
    /// Free-form metadata
    #[serde(rename = "Info", default)]
    pub info: String,
    /// user@host of the holder
    #[serde(rename = "Who")]
    pub who: String,
    /// Version of the tool that took the lock
    #[serde(rename = "Version")]
    pub version: String,
    /// When the lock was taken
    #[serde(rename = "Created")]
    pub created: DateTime<Utc>,
    /// Path of the locked state, filled in by the state handle
    #[serde(rename = "Path", default)]
    pub path: String,
}

impl LockInfo {
    /// Create lock info for an operation, stamped with a fresh id and time
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            info: String::new(),
            who: who(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: Utc::now(),
            path: String::new(),
        }
    }

    /// Attach free-form metadata
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    /// The id this lock will be released with
    pub fn lock_id(&self) -> LockId {
        LockId::new(self.id.clone())
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Lock Info:")?;
        writeln!(f, "  ID:        {}", self.id)?;
        writeln!(f, "  Path:      {}", self.path)?;
        writeln!(f, "  Operation: {}", self.operation)?;
        writeln!(f, "  Who:       {}", self.who)?;
        writeln!(f, "  Version:   {}", self.version)?;
        writeln!(f, "  Created:   {}", self.created)?;
        write!(f, "  Info:      {}", self.info)
    }
}

fn who() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{user}@{host}")
}
