//! Cancellation context
//!
//! A [`Context`] is done once any of its cancel signals fires or its
//! deadline passes. Children derived with [`Context::with_cancel`] or
//! [`Context::with_timeout`] are done whenever their parent is.

use crossbeam::channel::{self, Receiver, RecvError, Select, Sender};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Why a context is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// A cancel handle was triggered
    Cancelled,
    /// The deadline passed
    DeadlineExceeded,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "context canceled"),
            Self::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

impl std::error::Error for ContextError {}

/// Cancellation signals plus an optional deadline
#[derive(Debug, Clone, Default)]
pub struct Context {
    // Nothing is ever sent on these; a disconnect is the cancel signal.
    signals: Vec<Receiver<()>>,
    deadline: Option<Instant>,
}

/// Cancels the context it was created with
///
/// Dropping the handle cancels as well.
#[derive(Debug)]
pub struct CancelHandle {
    sender: Mutex<Option<Sender<()>>>,
}

impl CancelHandle {
    /// Cancel the context. Safe to call more than once.
    pub fn cancel(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);
    }
}

impl Context {
    /// A context that is never done
    pub fn background() -> Self {
        Self::default()
    }

    /// A child context with its own cancel handle
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (sender, receiver) = channel::bounded(0);
        let mut child = self.clone();
        child.signals.push(receiver);
        let handle = CancelHandle {
            sender: Mutex::new(Some(sender)),
        };
        (child, handle)
    }

    /// A child context that is done after `timeout` at the latest
    ///
    /// A timeout too large to represent leaves the parent's deadline in place.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut child = self.clone();
        if let Some(deadline) = Instant::now().checked_add(timeout) {
            child.deadline = Some(match self.deadline {
                Some(parent) if parent < deadline => parent,
                _ => deadline,
            });
        }
        child
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Why the context is done, or `None` while it is still live
    pub fn err(&self) -> Option<ContextError> {
        if self.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Whether the context is done
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    fn is_cancelled(&self) -> bool {
        self.signals
            .iter()
            .any(|s| matches!(s.try_recv(), Err(channel::TryRecvError::Disconnected)))
    }

    /// Block until `rx` yields or the context is done, whichever is first
    ///
    /// `Ok` carries what `rx` produced, including a disconnect.
    pub fn select<T>(&self, rx: &Receiver<T>) -> Result<Result<T, RecvError>, ContextError> {
        let deadline = self.deadline.map(channel::at);

        let mut sel = Select::new();
        let work = sel.recv(rx);
        let signals: Vec<usize> = self.signals.iter().map(|s| sel.recv(s)).collect();
        let timer = deadline.as_ref().map(|d| sel.recv(d));

        let op = sel.select();
        let index = op.index();

        if index == work {
            return Ok(op.recv(rx));
        }
        if let Some(pos) = signals.iter().position(|&i| i == index) {
            let _ = op.recv(&self.signals[pos]);
            return Err(ContextError::Cancelled);
        }
        if let (Some(i), Some(d)) = (timer, deadline.as_ref())
            && i == index
        {
            let _ = op.recv(d);
        }
        Err(ContextError::DeadlineExceeded)
    }

    /// Sleep for `duration`, waking early if the context is done
    pub fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        let timer = channel::after(duration);
        self.select(&timer).map(|_| ())
    }
}
