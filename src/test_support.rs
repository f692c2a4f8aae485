//! Fakes shared by unit tests

use anyhow::{Result, anyhow};
use statekit::{
    LockId, LockInfo, Locker, MemoryState, ResourceInstance, State, StateCodec, StateHandle,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::backend::{Backend, OperationContext};
use crate::engine::{Engine, HookAction, HookRegistry, StopToken};
use crate::operation::{ChangeAction, ModuleTree, Operation, Plan};

/// A snapshot with `n` resources
pub fn sample_state(n: usize) -> Arc<State> {
    (0..n)
        .fold(State::new(), |state, i| {
            state.with_resource(
                format!("null_resource.r{i}"),
                ResourceInstance::new("null_resource", i.to_string()),
            )
        })
        .into_shared()
}

/// Codec that cannot encode anything
pub struct BrokenCodec;

impl StateCodec for BrokenCodec {
    fn encode(&self, _state: &State) -> statekit::Result<Vec<u8>> {
        Err(statekit::Error::Encode("unsupported value".into()))
    }

    fn decode(&self, _bytes: &[u8]) -> statekit::Result<State> {
        Err(statekit::Error::Encode("unsupported value".into()))
    }
}

/// Ordered record of calls made on the fakes, shared between clones
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<&'static str>>>);

impl EventLog {
    pub fn push(&self, event: &'static str) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

// ============================================================================
// State Handle
// ============================================================================

/// In-memory handle with switchable failures and call counters
///
/// Clones share everything, so a test can keep one while the orchestrator
/// owns another. Every call is recorded in the event log on entry, whether
/// or not it then fails.
#[derive(Clone, Default)]
pub struct FlakyHandle {
    store: Arc<MemoryState>,
    events: EventLog,
    fail_write: bool,
    fail_persist: bool,
    fail_unlock: bool,
    writes: Arc<AtomicUsize>,
    persists: Arc<AtomicUsize>,
    locks: Arc<AtomicUsize>,
    unlocks: Arc<AtomicUsize>,
}

impl FlakyHandle {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn failing_write() -> Self {
        Self {
            fail_write: true,
            ..Self::default()
        }
    }

    pub fn failing_persist() -> Self {
        Self {
            fail_persist: true,
            ..Self::default()
        }
    }

    pub fn failing_unlock() -> Self {
        Self {
            fail_unlock: true,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn persists(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }

    pub fn locks(&self) -> usize {
        self.locks.load(Ordering::SeqCst)
    }

    pub fn unlocks(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }

    /// Calls seen so far, plus whatever the engine logged, in order
    pub fn events(&self) -> Vec<&'static str> {
        self.events.events()
    }

    pub fn committed(&self) -> Option<Arc<State>> {
        self.store.committed()
    }

    pub fn lock_info(&self) -> Option<LockInfo> {
        self.store.lock_info()
    }

    /// The underlying store, for taking the lock from "another operation"
    pub fn store(&self) -> &MemoryState {
        &self.store
    }
}

impl Locker for FlakyHandle {
    fn lock(&self, info: &LockInfo) -> statekit::Result<LockId> {
        self.locks.fetch_add(1, Ordering::SeqCst);
        self.events.push("lock");
        self.store.lock(info)
    }

    fn unlock(&self, id: &LockId) -> statekit::Result<()> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        self.events.push("unlock");
        if self.fail_unlock {
            return Err(statekit::Error::Other("lock service unavailable".into()));
        }
        self.store.unlock(id)
    }
}

impl StateHandle for FlakyHandle {
    fn state(&self) -> Option<Arc<State>> {
        self.store.state()
    }

    fn write_state(&self, state: &Arc<State>) -> statekit::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.events.push("write");
        if self.fail_write {
            return Err(statekit::Error::Other("write refused".into()));
        }
        self.store.write_state(state)
    }

    fn persist_state(&self) -> statekit::Result<()> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        self.events.push("persist");
        if self.fail_persist {
            return Err(statekit::Error::Other("persist refused".into()));
        }
        self.store.persist_state()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// What the fake engine does when driven
#[derive(Debug, Default)]
pub struct EngineScript {
    /// Resource operations performed in order by `apply`
    pub steps: Vec<(String, HookAction)>,
    /// Pause before each step
    pub step_delay: Duration,
    pub fail_refresh: bool,
    pub fail_plan: bool,
    /// Fail `apply` with this message after the steps
    pub fail_apply: Option<String>,
    pub panic_apply: bool,
    /// Keep `apply` running until stopped
    pub wait_for_stop: bool,
}

impl EngineScript {
    /// Create each address in turn
    pub fn creating(addresses: &[&str]) -> Self {
        Self {
            steps: addresses
                .iter()
                .map(|a| ((*a).to_string(), HookAction::Create))
                .collect(),
            ..Self::default()
        }
    }
}

/// What the fake engine was asked to do
#[derive(Debug, Default)]
pub struct EngineCalls {
    pub refreshes: AtomicUsize,
    pub plans: AtomicUsize,
    pub applies: AtomicUsize,
    pub saw_stop: AtomicBool,
    pub finished: AtomicBool,
}

impl EngineCalls {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn planned(action: HookAction) -> ChangeAction {
    match action {
        HookAction::Create => ChangeAction::Create,
        HookAction::Update => ChangeAction::Update,
        HookAction::Delete => ChangeAction::Delete,
    }
}

pub struct FakeEngine {
    script: Arc<EngineScript>,
    calls: Arc<EngineCalls>,
    state: Mutex<Arc<State>>,
    hooks: HookRegistry,
    events: EventLog,
}

impl FakeEngine {
    fn step(&self, address: &str, action: HookAction) -> Arc<State> {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match action {
            HookAction::Delete => current.without_resource(address),
            HookAction::Create | HookAction::Update => current.with_resource(
                address,
                ResourceInstance::new("null_resource", address),
            ),
        }
        .into_shared();
        *current = Arc::clone(&next);
        next
    }
}

impl Engine for FakeEngine {
    fn refresh(&self) -> Result<Arc<State>> {
        self.calls.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_refresh {
            return Err(anyhow!("provider unreachable"));
        }
        Ok(self.current_state())
    }

    fn plan(&self) -> Result<Plan> {
        self.calls.plans.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_plan {
            return Err(anyhow!("dependency cycle"));
        }
        Ok(self
            .script
            .steps
            .iter()
            .fold(Plan::new(), |plan, (address, action)| {
                plan.with_change(address.as_str(), planned(*action))
            }))
    }

    fn apply(&self, stop: &StopToken) -> Result<Arc<State>> {
        self.calls.applies.fetch_add(1, Ordering::SeqCst);
        if self.script.panic_apply {
            panic!("engine crashed");
        }

        for (address, action) in &self.script.steps {
            if stop.is_stopped() {
                break;
            }
            thread::sleep(self.script.step_delay);
            let next = self.step(address, *action);
            self.hooks.notify_state(&next);
            self.hooks.notify_apply(address, *action, None);
        }

        while self.script.wait_for_stop && !stop.is_stopped() {
            thread::sleep(Duration::from_millis(1));
        }
        self.calls.saw_stop.store(stop.is_stopped(), Ordering::SeqCst);
        self.calls.finished.store(true, Ordering::SeqCst);
        self.events.push("apply done");

        if let Some(msg) = &self.script.fail_apply {
            self.hooks
                .notify_apply("null_resource.broken", HookAction::Create, Some(msg.as_str()));
            return Err(anyhow!(msg.clone()));
        }
        Ok(self.current_state())
    }

    fn current_state(&self) -> Arc<State> {
        Arc::clone(&*self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

// ============================================================================
// Backend
// ============================================================================

pub struct FakeBackend {
    pub script: Arc<EngineScript>,
    pub calls: Arc<EngineCalls>,
    pub handle: FlakyHandle,
    pub initial: Arc<State>,
    pub fail_context: bool,
    pub contexts: AtomicUsize,
}

impl FakeBackend {
    pub fn new(script: EngineScript, handle: FlakyHandle) -> Self {
        Self {
            script: Arc::new(script),
            calls: Arc::new(EngineCalls::default()),
            handle,
            initial: State::new().into_shared(),
            fail_context: false,
            contexts: AtomicUsize::new(0),
        }
    }
}

impl Backend for FakeBackend {
    fn context(
        &self,
        _op: &Operation,
        _module: &ModuleTree,
        hooks: &HookRegistry,
    ) -> Result<OperationContext> {
        self.contexts.fetch_add(1, Ordering::SeqCst);
        if self.fail_context {
            return Err(anyhow!("backend not initialized"));
        }
        let engine = FakeEngine {
            script: Arc::clone(&self.script),
            calls: Arc::clone(&self.calls),
            state: Mutex::new(Arc::clone(&self.initial)),
            hooks: hooks.clone(),
            events: self.handle.events.clone(),
        };
        Ok(OperationContext {
            engine: Box::new(engine),
            state: Box::new(self.handle.clone()),
        })
    }
}
