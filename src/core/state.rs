use crate::config::settings::SandboxConfig;
use crate::config::types::{EntropyDenied, Result};
use crate::entropy::budget::{with_entropy_allowance, EntropyAllowance};
use crate::entropy::gate::{EntropyGate, Phase};
use crate::entropy::source::EntropySource;
use crate::module::object::ModuleHandle;
use crate::observability::events::{EventLog, LifecycleEventKind};
use crate::patch::registry::BeforeFirstRequest;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A before-first-request callback bound to the module it was queued for
pub struct PendingCallback {
    pub module: ModuleHandle,
    pub callback: BeforeFirstRequest,
}

impl PendingCallback {
    pub fn module_name(&self) -> &str {
        self.module.name()
    }

    pub fn invoke(&self) -> Result<()> {
        (self.callback)(&self.module)
    }
}

impl std::fmt::Debug for PendingCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCallback")
            .field("module", &self.module.name())
            .finish_non_exhaustive()
    }
}

/// Process-wide sandbox state shared by the gate, façades, interceptor and
/// lifecycle controller.
///
/// Single writer: only the lifecycle controller flips the phase, arms the
/// source and drains the blocked/pending tables. The interceptor only
/// appends to them while modules load.
pub struct SandboxState {
    gate: EntropyGate,
    source: EntropySource,
    blocked: Mutex<BTreeMap<String, ModuleHandle>>,
    pending: Mutex<Vec<PendingCallback>>,
    events: EventLog,
}

impl SandboxState {
    pub fn new(config: &SandboxConfig) -> Arc<Self> {
        Arc::new(Self {
            gate: EntropyGate::new(),
            source: EntropySource::new(config.deterministic_seed),
            blocked: Mutex::new(BTreeMap::new()),
            pending: Mutex::new(Vec::new()),
            events: EventLog::new(),
        })
    }

    pub fn gate(&self) -> &EntropyGate {
        &self.gate
    }

    pub fn source(&self) -> &EntropySource {
        &self.source
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn phase(&self) -> Phase {
        self.gate.phase()
    }

    pub fn is_sandboxed(&self) -> bool {
        self.gate.is_sandboxed()
    }

    /// Gate check for one entropy draw, recording denials
    pub fn try_consume_entropy(&self) -> std::result::Result<(), EntropyDenied> {
        self.gate.try_consume_entropy().map_err(|denied| {
            self.events
                .record(LifecycleEventKind::EntropyDenied, None, denied.to_string());
            denied
        })
    }

    /// One gated entropy draw filling `buf`
    pub fn fill_entropy(&self, buf: &mut [u8]) -> Result<()> {
        self.try_consume_entropy()?;
        self.source.fill_permitted(buf)
    }

    /// Scoped allowance of `n` sandboxed draws
    pub fn allow_entropy(&self, n: u32) -> EntropyAllowance<'_> {
        with_entropy_allowance(&self.gate, n)
    }

    pub(crate) fn record_blocked(&self, name: &str, original: ModuleHandle) {
        self.lock_blocked().insert(name.to_string(), original);
    }

    pub(crate) fn forget_blocked(&self, name: &str) -> Option<ModuleHandle> {
        self.lock_blocked().remove(name)
    }

    pub(crate) fn take_blocked(&self) -> BTreeMap<String, ModuleHandle> {
        std::mem::take(&mut *self.lock_blocked())
    }

    /// Names currently substituted by a façade
    pub fn blocked_modules(&self) -> Vec<String> {
        self.lock_blocked().keys().cloned().collect()
    }

    pub(crate) fn push_pending(&self, pending: PendingCallback) {
        self.events.record(
            LifecycleEventKind::CallbackQueued,
            Some(pending.module_name()),
            "before-first-request callback queued",
        );
        self.lock_pending().push(pending);
    }

    pub(crate) fn take_pending(&self) -> Vec<PendingCallback> {
        std::mem::take(&mut *self.lock_pending())
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Module names with queued callbacks, in queue order
    pub fn pending_modules(&self) -> Vec<String> {
        self.lock_pending()
            .iter()
            .map(|p| p.module_name().to_string())
            .collect()
    }

    fn lock_blocked(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ModuleHandle>> {
        self.blocked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<PendingCallback>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxState")
            .field("phase", &self.phase())
            .field("budget", &self.gate.budget())
            .field("source", &self.source)
            .field("blocked", &self.blocked_modules())
            .field("pending", &self.pending_count())
            .finish()
    }
}
