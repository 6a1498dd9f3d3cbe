//! Lifecycle Controller
//!
//! Two entry points, each meant to run once per process:
//!
//! 1. [`LifecycleController::before_top_level`]: before any module loads,
//!    disable the OS entropy source and install the import interceptor.
//! 2. [`LifecycleController::before_first_request`]: on the first live
//!    request, flip the phase, restore the entropy source, remove the
//!    interceptor, put real modules back in place of façades and drain the
//!    queued callbacks in order.
//!
//! The transition is guarded by a single atomic flag so concurrent first
//! requests perform it exactly once. Losers block on a completion latch
//! until the winner has finished the drain, so no request observes a
//! half-torn-down sandbox.

use crate::config::settings::SandboxConfig;
use crate::config::types::{CallbackFailure, Result, SandboxError};
use crate::core::state::{PendingCallback, SandboxState};
use crate::host::import::ModuleHost;
use crate::module::cache::ModuleSlot;
use crate::observability::events::{LifecycleEventKind, TransitionReport};
use crate::patch::builtin::register_builtin_policies;
use crate::patch::interceptor::{ImportContext, PatchFinder};
use crate::patch::registry::{PatchRegistry, PatchRegistryBuilder};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use uuid::Uuid;

/// Result of a `before_first_request` call
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// This call performed the transition
    Completed(TransitionReport),
    /// Another call did; it had finished by the time this one returned
    AlreadyUnsandboxed,
}

impl TransitionOutcome {
    pub fn report(&self) -> Option<&TransitionReport> {
        match self {
            TransitionOutcome::Completed(report) => Some(report),
            TransitionOutcome::AlreadyUnsandboxed => None,
        }
    }
}

#[derive(Debug, Default)]
struct LatchState {
    owner: Option<ThreadId>,
    done: bool,
}

/// Opened once the winning transition has finished
#[derive(Debug, Default)]
struct TransitionLatch {
    state: Mutex<LatchState>,
    opened: Condvar,
}

impl TransitionLatch {
    fn lock(&self) -> std::sync::MutexGuard<'_, LatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self) {
        self.lock().owner = Some(thread::current().id());
    }

    fn open(&self) {
        self.lock().done = true;
        self.opened.notify_all();
    }

    /// Block until the transition is done. A callback re-entering from the
    /// winner's own thread returns at once.
    fn wait(&self) {
        let me = thread::current().id();
        let mut state = self.lock();
        while !state.done {
            if state.owner == Some(me) {
                return;
            }
            state = self
                .opened
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Opens the latch on every exit path of the winner
struct OpenOnDrop<'a>(&'a TransitionLatch);

impl Drop for OpenOnDrop<'_> {
    fn drop(&mut self) {
        self.0.open();
    }
}

pub struct LifecycleController {
    state: Arc<SandboxState>,
    registry: Arc<PatchRegistry>,
    host: Arc<ModuleHost>,
    armed: AtomicBool,
    transitioned: AtomicBool,
    latch: TransitionLatch,
    last_report: Mutex<Option<TransitionReport>>,
}

impl LifecycleController {
    pub fn new(state: Arc<SandboxState>, registry: Arc<PatchRegistry>, host: Arc<ModuleHost>) -> Self {
        Self {
            state,
            registry,
            host,
            armed: AtomicBool::new(false),
            transitioned: AtomicBool::new(false),
            latch: TransitionLatch::default(),
            last_report: Mutex::new(None),
        }
    }

    /// Build state and registry from `config`. `extra` may register
    /// additional policies before the registry is frozen.
    pub fn from_config<F>(config: &SandboxConfig, host: Arc<ModuleHost>, extra: F) -> Result<Self>
    where
        F: FnOnce(&mut PatchRegistryBuilder),
    {
        config.validate()?;
        let mut builder = PatchRegistry::builder();
        if config.builtin_policies {
            register_builtin_policies(&mut builder, config);
        }
        extra(&mut builder);

        Ok(Self::new(
            SandboxState::new(config),
            Arc::new(builder.build()),
            host,
        ))
    }

    pub fn state(&self) -> &Arc<SandboxState> {
        &self.state
    }

    pub fn registry(&self) -> &Arc<PatchRegistry> {
        &self.registry
    }

    pub fn host(&self) -> &Arc<ModuleHost> {
        &self.host
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn has_transitioned(&self) -> bool {
        self.transitioned.load(Ordering::SeqCst)
    }

    /// Report of the transition, once it has happened
    pub fn last_transition(&self) -> Option<TransitionReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Disable the OS entropy source and install the interceptor
    pub fn before_top_level(&self) -> Result<()> {
        if self.has_transitioned() {
            return Err(SandboxError::Config(
                "before_top_level called after the first request".to_string(),
            ));
        }
        if self.armed.swap(true, Ordering::SeqCst) {
            log::warn!("before_top_level called more than once; ignoring");
            return Ok(());
        }

        self.state.source().arm();
        let cx = ImportContext::new(Arc::clone(&self.state), Arc::clone(self.host.cache()));
        self.host
            .insert_resolver_front(Arc::new(PatchFinder::new(Arc::clone(&self.registry), cx)));

        self.state.events().record(
            LifecycleEventKind::TopLevelArmed,
            None,
            format!("{} patched modules registered", self.registry.len()),
        );
        Ok(())
    }

    /// Tear the sandbox down. Exactly one caller does the work; the others
    /// wait until it has finished.
    ///
    /// Callback failures do not stop the drain; they are returned together
    /// as `CallbackFailures` once every callback has run.
    pub fn before_first_request(&self) -> Result<TransitionOutcome> {
        if self
            .transitioned
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.latch.wait();
            self.state.gate().enter_unsandboxed();
            return Ok(TransitionOutcome::AlreadyUnsandboxed);
        }
        self.latch.claim();
        let _open = OpenOnDrop(&self.latch);

        self.state
            .events()
            .record(LifecycleEventKind::TransitionStarted, None, "first request");

        self.state.gate().enter_unsandboxed();
        self.state.source().disarm();
        let removed = self.host.remove_resolvers(|r| r.is_patch_interceptor());
        log::debug!("Removed {} import interceptor(s)", removed);

        let restored_modules = self.restore_blocked_modules();

        let mut callbacks_run = Vec::new();
        let mut failures = Vec::new();
        for pending in self.state.take_pending() {
            let name = pending.module_name().to_string();
            match run_isolated(&pending) {
                Ok(()) => callbacks_run.push(name),
                Err(failure) => {
                    self.state.events().record(
                        LifecycleEventKind::CallbackFailed,
                        Some(&name),
                        failure.message.clone(),
                    );
                    failures.push(failure);
                }
            }
        }

        let report = TransitionReport {
            transition_id: Uuid::new_v4(),
            restored_modules,
            callbacks_run,
            failures: failures.clone(),
            deterministic_draws: self.state.source().deterministic_draws(),
        };
        self.state.events().record(
            LifecycleEventKind::TransitionCompleted,
            None,
            format!(
                "{} callbacks run, {} failed",
                report.callbacks_run.len(),
                report.failures.len()
            ),
        );
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());

        if !failures.is_empty() {
            return Err(SandboxError::CallbackFailures(failures));
        }
        Ok(TransitionOutcome::Completed(report))
    }

    fn restore_blocked_modules(&self) -> Vec<String> {
        let cache = self.host.cache();
        let mut restored = Vec::new();
        for (name, original) in self.state.take_blocked() {
            cache.insert(name.clone(), ModuleSlot::Real(original));
            self.state
                .events()
                .record(LifecycleEventKind::ModuleRestored, Some(&name), "façade removed");
            restored.push(name);
        }
        restored
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("armed", &self.is_armed())
            .field("transitioned", &self.has_transitioned())
            .field("state", &self.state)
            .finish()
    }
}

fn run_isolated(pending: &PendingCallback) -> std::result::Result<(), CallbackFailure> {
    let failure = |message: String| CallbackFailure {
        module: pending.module_name().to_string(),
        message,
    };
    match catch_unwind(AssertUnwindSafe(|| pending.invoke())) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(failure(err.to_string())),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "callback panicked".to_string());
            Err(failure(format!("panicked: {}", message)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::gate::Phase;
    use crate::testing::fixtures::{ScriptedLoader, StaticResolver};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn bare_config() -> SandboxConfig {
        SandboxConfig {
            builtin_policies: false,
            ..SandboxConfig::default()
        }
    }

    #[test]
    fn test_top_level_installs_interceptor_and_arms_source() {
        let host = Arc::new(ModuleHost::new());
        let controller = LifecycleController::from_config(&bare_config(), host, |_| {}).unwrap();
        controller.before_top_level().unwrap();

        assert!(controller.state().source().is_armed());
        assert!(controller.host().resolvers()[0].is_patch_interceptor());

        // Second call does not stack a second interceptor.
        controller.before_top_level().unwrap();
        assert_eq!(controller.host().resolvers().len(), 1);
    }

    #[test]
    fn test_transition_runs_callbacks_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let host = Arc::new(ModuleHost::new());
        host.push_resolver(Arc::new(
            StaticResolver::new().with_loader("m", ScriptedLoader::new(|_| Ok(()))),
        ));
        let controller = LifecycleController::from_config(&bare_config(), host, |b| {
            b.before_first_request("m", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        })
        .unwrap();

        controller.before_top_level().unwrap();
        controller.host().import("m").unwrap();

        let outcome = controller.before_first_request().unwrap();
        assert_eq!(outcome.report().unwrap().callbacks_run, vec!["m"]);
        assert_eq!(controller.state().phase(), Phase::Unsandboxed);
        assert!(controller.host().resolvers().iter().all(|r| !r.is_patch_interceptor()));

        assert!(matches!(
            controller.before_first_request().unwrap(),
            TransitionOutcome::AlreadyUnsandboxed
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_callback_does_not_stop_drain() {
        let host = Arc::new(ModuleHost::new());
        host.push_resolver(Arc::new(
            StaticResolver::new()
                .with_loader("a", ScriptedLoader::new(|_| Ok(())))
                .with_loader("b", ScriptedLoader::new(|_| Ok(())))
                .with_loader("c", ScriptedLoader::new(|_| Ok(()))),
        ));
        let controller = LifecycleController::from_config(&bare_config(), host, |b| {
            b.before_first_request("a", |m| {
                m.set("ran", json!(true));
                Ok(())
            });
            b.before_first_request("b", |m| {
                Err(SandboxError::ModuleExec {
                    module: m.name().to_string(),
                    message: "reseed failed".to_string(),
                })
            });
            b.before_first_request("c", |_| panic!("callback exploded"));
        })
        .unwrap();

        controller.before_top_level().unwrap();
        for name in ["a", "b", "c"] {
            controller.host().import(name).unwrap();
        }

        match controller.before_first_request() {
            Err(SandboxError::CallbackFailures(failures)) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].module, "b");
                assert_eq!(failures[1].module, "c");
                assert!(failures[1].message.contains("callback exploded"));
            }
            other => panic!("expected callback failures, got {:?}", other),
        }

        let report = controller.last_transition().unwrap();
        assert_eq!(report.callbacks_run, vec!["a"]);
        assert_eq!(controller.state().phase(), Phase::Unsandboxed);
        assert_eq!(controller.state().pending_count(), 0);
    }

    #[test]
    fn test_top_level_after_transition_is_rejected() {
        let host = Arc::new(ModuleHost::new());
        let controller = LifecycleController::from_config(&bare_config(), host, |_| {}).unwrap();
        controller.before_first_request().unwrap();
        assert!(matches!(
            controller.before_top_level(),
            Err(SandboxError::Config(_))
        ));
    }
}
