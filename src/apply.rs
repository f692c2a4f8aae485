//! Apply orchestration
//!
//! Runs an apply in phases:
//! 1. Check - Refuse to apply nothing
//! 2. Hooks - Attach counters and the state observer
//! 3. Lock - Take the state lock (optional)
//! 4. Plan - Refresh and plan when no plan was supplied
//! 5. Execute - Run the engine on a worker, stopping it on cancellation
//! 6. Persist - Save the resulting state, with recovery fallbacks
//! 7. Report - Summary and state path
//!
//! Cleanup (lock release, hook removal) is recorded as each resource is
//! taken and runs in reverse order whatever phase failed.

use anyhow::anyhow;
use crossbeam::channel;
use statekit::{JsonCodec, LockId, LockInfo, Locker, State, StateCodec, StateHandle};
use std::sync::Arc;
use std::thread;

use crate::backend::{Backend, OperationContext};
use crate::config::ApplyConfig;
use crate::context::Context;
use crate::engine::{CountHook, Engine, Hook, HookRegistry, StateHook, StopToken};
use crate::error::ApplyError;
use crate::lock;
use crate::operation::{ApplySummary, ModuleTree, Operation, RunningOperation};
use crate::persist::{self, Recovery};
use crate::ui::{self, ConsoleUi, Ui};

type Step = Box<dyn FnOnce() -> Result<(), ApplyError> + Send>;

/// Cleanup steps run in reverse registration order
#[derive(Default)]
struct Teardown {
    steps: Vec<(&'static str, Step)>,
}

impl Teardown {
    fn defer<F>(&mut self, name: &'static str, step: F)
    where
        F: FnOnce() -> Result<(), ApplyError> + Send + 'static,
    {
        self.steps.push((name, Box::new(step)));
    }

    /// Run every step; failures are appended to `result`
    fn run<T>(self, mut result: Result<T, ApplyError>) -> Result<T, ApplyError> {
        for (name, step) in self.steps.into_iter().rev() {
            log::debug!("Teardown: {name}");
            if let Err(err) = step() {
                log::warn!("Teardown step '{name}' failed: {err}");
                result = Err(ApplyError::combine(result.err(), err));
            }
        }
        result
    }
}

/// Drives apply operations against a backend
pub struct Applier {
    backend: Arc<dyn Backend>,
    hooks: HookRegistry,
    ui: Arc<dyn Ui>,
    config: ApplyConfig,
    codec: Arc<dyn StateCodec>,
}

impl Applier {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            hooks: HookRegistry::new(),
            ui: Arc::new(ConsoleUi::new()),
            config: ApplyConfig::default(),
            codec: Arc::new(JsonCodec),
        }
    }

    /// Share an existing hook registry
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_ui(mut self, ui: Arc<dyn Ui>) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_config(mut self, config: ApplyConfig) -> Self {
        self.config = config;
        self
    }

    /// Codec for the backup file and the printed state
    pub fn with_codec(mut self, codec: Arc<dyn StateCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Hooks the engine is given; caller hooks registered here stay put
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Run `op` to completion, recording the outcome in `running`
    ///
    /// `running.state` is updated as soon as a snapshot is known and again
    /// after execution, so it holds the newest state even on failure.
    pub fn run_apply(&self, ctx: &Context, op: &Operation, running: &mut RunningOperation) {
        let mut teardown = Teardown::default();
        let result = self.apply_phases(ctx, op, running, &mut teardown);

        match teardown.run(result) {
            Ok(summary) => {
                log::info!("{summary}");
                running.summary = Some(summary);
            }
            Err(err) => {
                log::error!("Apply failed: {err}");
                running.err = Some(err);
            }
        }
    }

    fn apply_phases(
        &self,
        ctx: &Context,
        op: &Operation,
        running: &mut RunningOperation,
        teardown: &mut Teardown,
    ) -> Result<ApplySummary, ApplyError> {
        // 1. Check
        if op.has_no_configuration() {
            return Err(ApplyError::NoConfiguration);
        }
        let module = op.module.clone().unwrap_or_else(ModuleTree::empty);

        // 2. Hooks
        let counter = Arc::new(CountHook::new());
        let observer = Arc::new(StateHook::new());
        let guard = self.hooks.register(vec![
            Arc::clone(&counter) as Arc<dyn Hook>,
            Arc::clone(&observer) as Arc<dyn Hook>,
        ]);
        teardown.defer("unregister hooks", move || {
            drop(guard);
            Ok(())
        });

        let OperationContext { engine, state } = self
            .backend
            .context(op, &module, &self.hooks)
            .map_err(ApplyError::Context)?;
        let handle: Arc<dyn StateHandle> = Arc::from(state);
        observer.attach(Arc::clone(&handle));

        // 3. Lock
        if op.lock_state {
            let id = self.lock_state(ctx, op, handle.as_ref())?;
            let ui = Arc::clone(&self.ui);
            let locker = Arc::clone(&handle);
            teardown.defer("release state lock", move || {
                release_lock(ui.as_ref(), locker.as_ref(), &id)
            });
        }
        running.state = Some(engine.current_state());

        // 4. Plan
        if op.plan.is_none() {
            plan(engine.as_ref(), op)?;
        }

        // 5. Execute
        let outcome = self.execute(ctx, engine.as_ref());
        let snapshot = engine.current_state();
        running.state = Some(Arc::clone(&snapshot));
        if let Some(seen) = observer.latest() {
            log::debug!(
                "Last state update seen: serial {}, current serial {}",
                seen.serial,
                snapshot.serial
            );
        }

        // 6. Persist
        let recovery = Recovery {
            ui: self.ui.as_ref(),
            backup_dir: &self.config.backup_dir,
            codec: Arc::clone(&self.codec),
        };
        if let Err(err) = persist::persist(handle.as_ref(), &snapshot, &recovery) {
            if let Err(apply_err) = &outcome {
                log::warn!("Apply error superseded by state save failure: {apply_err:#}");
            }
            return Err(ApplyError::Persist(err));
        }

        // 7. Report
        outcome.map_err(ApplyError::Apply)?;

        let tally = counter.tally();
        let summary = ApplySummary {
            added: tally.added,
            changed: tally.changed,
            removed: tally.removed,
            destroy: op.destroy,
        };
        self.report(&summary);
        Ok(summary)
    }

    fn lock_state(
        &self,
        ctx: &Context,
        op: &Operation,
        locker: &dyn Locker,
    ) -> Result<LockId, ApplyError> {
        if !self.ui.is_quiet() {
            self.ui
                .output("Acquiring state lock. This may take a few moments...");
        }
        let lock_ctx = ctx.with_timeout(op.state_lock_timeout);
        let info = LockInfo::new(op.kind.to_string());
        lock::acquire(&lock_ctx, locker, &info, &self.config.lock_retry())
            .map_err(ApplyError::Lock)
    }

    /// Run the engine on a worker thread until it finishes or `ctx` is done
    ///
    /// On cancellation the engine is asked to stop and still waited for;
    /// its partial state is what gets persisted.
    fn execute(&self, ctx: &Context, engine: &dyn Engine) -> anyhow::Result<Arc<State>> {
        let stop = StopToken::new();
        // Disconnects when the worker returns or unwinds.
        let (done_tx, done_rx) = channel::bounded::<()>(0);

        thread::scope(|scope| {
            let token = &stop;
            let worker = scope.spawn(move || {
                let _done = done_tx;
                engine.apply(token)
            });

            if let Err(reason) = ctx.select(&done_rx) {
                log::warn!("Stopping apply: {reason}");
                self.ui.output("stopping apply operation...");
                stop.stop();
            }

            worker
                .join()
                .unwrap_or_else(|_| Err(anyhow!("apply worker panicked")))
        })
    }

    fn report(&self, summary: &ApplySummary) {
        self.ui.output(&ui::apply_complete_message(summary));
        if summary.has_changes() {
            self.ui
                .output(&ui::state_path_message(&self.config.state_out_path));
        }
    }
}

fn plan(engine: &dyn Engine, op: &Operation) -> Result<(), ApplyError> {
    if op.plan_refresh {
        let refreshed = engine.refresh().map_err(ApplyError::Refresh)?;
        log::info!("Refreshed state: {} resources", refreshed.len());
    }
    let plan = engine.plan().map_err(ApplyError::Plan)?;
    let (add, change, destroy) = plan.summary();
    log::info!("Plan: {add} to add, {change} to change, {destroy} to destroy");
    Ok(())
}

fn release_lock(ui: &dyn Ui, locker: &dyn Locker, id: &LockId) -> Result<(), ApplyError> {
    if !ui.is_quiet() {
        ui.output("Releasing state lock. This may take a few moments...");
    }
    lock::release(locker, id).map_err(|err| {
        ui.error(&err.to_string());
        ApplyError::Release(err)
    })
}
