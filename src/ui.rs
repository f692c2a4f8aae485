use colored::Colorize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::operation::ApplySummary;

/// Where operator-facing messages go
///
/// `output` is for results and the printed state; `error` is for
/// diagnostics. Both may be called from any thread.
pub trait Ui: Send + Sync {
    /// Print a normal message
    fn output(&self, msg: &str);

    /// Print a diagnostic
    fn error(&self, msg: &str);

    /// Whether informational chatter should be suppressed
    fn is_quiet(&self) -> bool {
        false
    }
}

// ============================================================================
// Console
// ============================================================================

/// Writes to stdout and stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleUi {
    quiet: bool,
}

impl ConsoleUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress informational messages
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}

impl Ui for ConsoleUi {
    fn output(&self, msg: &str) {
        println!("{msg}");
    }

    fn error(&self, msg: &str) {
        eprintln!("{} {}", "✗".red(), msg);
    }

    fn is_quiet(&self) -> bool {
        self.quiet
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Keeps every message in memory
#[derive(Debug, Default)]
pub struct MemoryUi {
    outputs: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    quiet: bool,
}

impl MemoryUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// A quiet instance
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    /// Messages passed to `output`, oldest first
    pub fn outputs(&self) -> Vec<String> {
        lock(&self.outputs).clone()
    }

    /// Messages passed to `error`, oldest first
    pub fn errors(&self) -> Vec<String> {
        lock(&self.errors).clone()
    }
}

impl Ui for MemoryUi {
    fn output(&self, msg: &str) {
        lock(&self.outputs).push(msg.to_string());
    }

    fn error(&self, msg: &str) {
        lock(&self.errors).push(msg.to_string());
    }

    fn is_quiet(&self) -> bool {
        self.quiet
    }
}

fn lock(lines: &Mutex<Vec<String>>) -> MutexGuard<'_, Vec<String>> {
    lines.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Messages
// ============================================================================

/// The completion line, bold green
pub fn apply_complete_message(summary: &ApplySummary) -> String {
    summary.to_string().green().bold().to_string()
}

/// Reminder of where the state was saved
pub fn state_path_message(path: &Path) -> String {
    format!(
        "The state of your infrastructure has been saved to the path\n\
         below. This state is required to modify and destroy your\n\
         infrastructure, so keep it safe. To inspect the complete state\n\
         use the `terraform show` command.\n\
         \n\
         State path: {}",
        path.display()
    )
}
