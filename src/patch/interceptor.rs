//! Loader Interceptor
//!
//! [`PatchFinder`] sits at the front of the resolver chain. Names without a
//! registry entry are declined so the chain resolves them untouched. For a
//! registered name the rest of the chain is consulted for the real spec,
//! whose loader is then wrapped in a [`PatchLoader`] that runs the entry's
//! hooks around `create_module` and `exec_module`.

use crate::config::types::{Result, SandboxError};
use crate::core::state::{PendingCallback, SandboxState};
use crate::entropy::budget::run_with_entropy_allowance;
use crate::host::resolver::{resolve_without_interceptors, Loader, ModuleSpec, Resolver};
use crate::module::cache::{ModuleCache, ModuleSlot};
use crate::module::facade::{AllowList, BlockedModule};
use crate::module::object::ModuleHandle;
use crate::observability::events::LifecycleEventKind;
use crate::patch::registry::{PatchEntry, PatchRegistry};
use std::sync::Arc;

/// What a policy may touch while its module loads
#[derive(Clone)]
pub struct ImportContext {
    state: Arc<SandboxState>,
    cache: Arc<ModuleCache>,
}

impl ImportContext {
    pub fn new(state: Arc<SandboxState>, cache: Arc<ModuleCache>) -> Self {
        Self { state, cache }
    }

    pub fn state(&self) -> &Arc<SandboxState> {
        &self.state
    }

    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    /// Run `body` with exactly `n` sandboxed entropy draws permitted
    pub fn with_entropy_allowance<T, F>(&self, n: u32, body: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        run_with_entropy_allowance(self.state.gate(), n, body).map_err(|err| {
            if let SandboxError::LeftoverEntropyAllowance { .. } = &err {
                self.state
                    .events()
                    .record(LifecycleEventKind::LeftoverAllowance, None, err.to_string());
            }
            err
        })
    }

    /// Replace `module` in the cache with a façade blocking every callable
    /// not in `allowlist`. Undone at the first request.
    pub fn block_calls(&self, module: &ModuleHandle, allowlist: AllowList) {
        let name = module.name().to_string();
        let detail = format!(
            "allowlist=[{}]",
            allowlist.names().collect::<Vec<_>>().join(",")
        );
        let facade = BlockedModule::new(Arc::clone(module), allowlist, Arc::clone(&self.state));
        self.cache.insert(name.clone(), ModuleSlot::Blocked(facade));
        self.state.record_blocked(&name, Arc::clone(module));
        self.state
            .events()
            .record(LifecycleEventKind::CallsBlocked, Some(&name), detail);
    }
}

impl std::fmt::Debug for ImportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportContext")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Loader wrapper applying one registry entry
pub struct PatchLoader {
    inner: Arc<dyn Loader>,
    entry: PatchEntry,
    cx: ImportContext,
}

impl PatchLoader {
    pub fn new(inner: Arc<dyn Loader>, entry: PatchEntry, cx: ImportContext) -> Self {
        Self { inner, entry, cx }
    }
}

impl Loader for PatchLoader {
    fn create_module(&self, spec: &ModuleSpec) -> Result<Option<ModuleHandle>> {
        let inner = &self.inner;
        self.entry
            .run_create(&self.cx, spec, &mut || inner.create_module(spec))
    }

    fn exec_module(&self, module: &ModuleHandle) -> Result<()> {
        // Queued at exec time so the callback binds the real module and
        // never-imported modules queue nothing.
        if let Some(callback) = &self.entry.before_first_request {
            self.cx.state.push_pending(PendingCallback {
                module: Arc::clone(module),
                callback: Arc::clone(callback),
            });
        }

        let inner = &self.inner;
        let result = self
            .entry
            .run_exec(&self.cx, module, &mut || inner.exec_module(module));

        if result.is_err() && self.cx.state.forget_blocked(module.name()).is_some() {
            log::debug!("Dropped façade record for failed module '{}'", module.name());
        }
        result
    }
}

/// Resolver-chain entry that wraps registered modules' loaders
pub struct PatchFinder {
    registry: Arc<PatchRegistry>,
    cx: ImportContext,
}

impl PatchFinder {
    pub fn new(registry: Arc<PatchRegistry>, cx: ImportContext) -> Self {
        Self { registry, cx }
    }
}

impl Resolver for PatchFinder {
    fn find_spec(&self, name: &str, chain: &[Arc<dyn Resolver>]) -> Result<Option<ModuleSpec>> {
        let entry = match self.registry.get(name) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        // Not found further down: the host reports it exactly as it would
        // without us.
        let spec = match resolve_without_interceptors(name, chain)? {
            Some(spec) => spec,
            None => return Ok(None),
        };

        self.cx.state.events().record(
            LifecycleEventKind::ModuleIntercepted,
            Some(name),
            format!("{:?}", entry),
        );
        let loader = PatchLoader::new(Arc::clone(&spec.loader), entry.clone(), self.cx.clone());
        Ok(Some(spec.with_loader(Arc::new(loader))))
    }

    fn is_patch_interceptor(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::SandboxConfig;
    use crate::host::import::ModuleHost;
    use crate::testing::fixtures::{ScriptedLoader, StaticResolver};
    use serde_json::json;

    fn host_with(
        registry: PatchRegistry,
        resolver: StaticResolver,
    ) -> (ModuleHost, Arc<SandboxState>) {
        let state = SandboxState::new(&SandboxConfig::default());
        let host = ModuleHost::new();
        host.push_resolver(Arc::new(resolver));
        let cx = ImportContext::new(Arc::clone(&state), Arc::clone(host.cache()));
        host.insert_resolver_front(Arc::new(PatchFinder::new(Arc::new(registry), cx)));
        (host, state)
    }

    #[test]
    fn test_unregistered_module_loads_untouched() {
        let resolver = StaticResolver::new().with_loader(
            "json",
            ScriptedLoader::new(|module| {
                module.set("ok", json!(true));
                Ok(())
            }),
        );
        let (host, state) = host_with(PatchRegistry::builder().build(), resolver);

        let slot = host.import("json").unwrap();
        assert!(!slot.is_blocked());
        assert_eq!(state.events().count(LifecycleEventKind::ModuleIntercepted), 0);
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_registered_but_missing_is_not_found() {
        let mut builder = PatchRegistry::builder();
        builder.on_execute("ghost", |_cx, _m, exec| exec());
        let (host, _state) = host_with(builder.build(), StaticResolver::new());

        assert!(matches!(
            host.import("ghost"),
            Err(SandboxError::ModuleNotFound(_))
        ));
    }

    #[test]
    fn test_hooks_wrap_create_and_exec() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (c, e) = (Arc::clone(&order), Arc::clone(&order));

        let mut builder = PatchRegistry::builder();
        builder.on_construct("m", move |_cx, _spec, create| {
            c.lock().unwrap().push("construct:enter");
            let module = create();
            c.lock().unwrap().push("construct:exit");
            module
        });
        builder.on_execute("m", move |_cx, _module, exec| {
            e.lock().unwrap().push("exec:enter");
            exec()?;
            e.lock().unwrap().push("exec:exit");
            Ok(())
        });

        let resolver = StaticResolver::new().with_loader("m", ScriptedLoader::new(|_| Ok(())));
        let (host, _state) = host_with(builder.build(), resolver);
        host.import("m").unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec!["construct:enter", "construct:exit", "exec:enter", "exec:exit"]
        );
    }

    #[test]
    fn test_callback_queued_only_for_imported_modules() {
        let mut builder = PatchRegistry::builder();
        builder
            .on_execute("m", |_cx, _m, exec| exec())
            .before_first_request("m", |_m| Ok(()));
        builder.before_first_request("n", |_m| Ok(()));

        let resolver = StaticResolver::new()
            .with_loader("m", ScriptedLoader::new(|_| Ok(())))
            .with_loader("n", ScriptedLoader::new(|_| Ok(())));
        let (host, state) = host_with(builder.build(), resolver);

        host.import("m").unwrap();
        assert_eq!(state.pending_modules(), vec!["m"]);
    }

    #[test]
    fn test_block_calls_substitutes_facade() {
        let mut builder = PatchRegistry::builder();
        builder.on_execute("rnd", |cx, module, exec| {
            exec()?;
            cx.block_calls(module, ["A"].into_iter().collect());
            Ok(())
        });
        let resolver = StaticResolver::new().with_loader(
            "rnd",
            ScriptedLoader::new(|module| {
                module.set_function("A", |_| Ok(json!(1)));
                module.set_function("B", |_| Ok(json!(2)));
                Ok(())
            }),
        );
        let (host, state) = host_with(builder.build(), resolver);

        let slot = host.import("rnd").unwrap();
        assert!(slot.is_blocked());
        assert_eq!(slot.call("A", &[]).unwrap(), json!(1));
        assert!(slot.call("B", &[]).is_err());
        assert_eq!(state.blocked_modules(), vec!["rnd"]);
    }

    #[test]
    fn test_interceptor_skips_other_interceptors() {
        let state = SandboxState::new(&SandboxConfig::default());
        let host = ModuleHost::new();
        host.push_resolver(Arc::new(
            StaticResolver::new().with_loader("m", ScriptedLoader::new(|_| Ok(()))),
        ));
        let mut builder = PatchRegistry::builder();
        builder.on_execute("m", |_cx, _m, exec| exec());
        let registry = Arc::new(builder.build());
        for _ in 0..2 {
            let cx = ImportContext::new(Arc::clone(&state), Arc::clone(host.cache()));
            host.insert_resolver_front(Arc::new(PatchFinder::new(Arc::clone(&registry), cx)));
        }

        assert!(host.import("m").is_ok());
        assert_eq!(state.events().count(LifecycleEventKind::ModuleIntercepted), 1);
    }
}
