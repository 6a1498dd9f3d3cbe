//! Patch Registry
//!
//! Maps a module name to the policy applied while that module loads: a hook
//! around `create_module`, a hook around `exec_module`, and an optional
//! callback queued for the first request. Registration happens on a
//! [`PatchRegistryBuilder`] during startup; [`PatchRegistryBuilder::build`]
//! freezes it into a read-only [`PatchRegistry`].
//!
//! A frozen registry has no registration API:
//!
//! ```compile_fail
//! let registry = seedbox::patch::registry::PatchRegistry::builder().build();
//! registry.before_first_request("random", |_module| Ok(()));
//! ```

use crate::config::types::Result;
use crate::host::resolver::ModuleSpec;
use crate::module::object::ModuleHandle;
use crate::patch::interceptor::ImportContext;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Callback run once before the first request, given the loaded module
pub type BeforeFirstRequest = Arc<dyn Fn(&ModuleHandle) -> Result<()> + Send + Sync>;

/// Policy wrapped around a loader's `create_module`
pub trait ConstructPolicy: Send + Sync {
    fn around_create(
        &self,
        cx: &ImportContext,
        spec: &ModuleSpec,
        create: &mut dyn FnMut() -> Result<Option<ModuleHandle>>,
    ) -> Result<Option<ModuleHandle>>;
}

/// Policy wrapped around a loader's `exec_module`
pub trait ExecPolicy: Send + Sync {
    fn around_exec(
        &self,
        cx: &ImportContext,
        module: &ModuleHandle,
        exec: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()>;
}

struct FnConstructPolicy<F>(F);

impl<F> ConstructPolicy for FnConstructPolicy<F>
where
    F: Fn(
            &ImportContext,
            &ModuleSpec,
            &mut dyn FnMut() -> Result<Option<ModuleHandle>>,
        ) -> Result<Option<ModuleHandle>>
        + Send
        + Sync,
{
    fn around_create(
        &self,
        cx: &ImportContext,
        spec: &ModuleSpec,
        create: &mut dyn FnMut() -> Result<Option<ModuleHandle>>,
    ) -> Result<Option<ModuleHandle>> {
        (self.0)(cx, spec, create)
    }
}

struct FnExecPolicy<F>(F);

impl<F> ExecPolicy for FnExecPolicy<F>
where
    F: Fn(&ImportContext, &ModuleHandle, &mut dyn FnMut() -> Result<()>) -> Result<()>
        + Send
        + Sync,
{
    fn around_exec(
        &self,
        cx: &ImportContext,
        module: &ModuleHandle,
        exec: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        (self.0)(cx, module, exec)
    }
}

/// Policy for one module name. Missing hooks behave as no-ops.
#[derive(Clone, Default)]
pub struct PatchEntry {
    pub on_construct: Option<Arc<dyn ConstructPolicy>>,
    pub on_execute: Option<Arc<dyn ExecPolicy>>,
    pub before_first_request: Option<BeforeFirstRequest>,
}

impl PatchEntry {
    /// Overlay the hooks `other` sets, keeping the rest
    pub fn merge(&mut self, other: PatchEntry) {
        if other.on_construct.is_some() {
            self.on_construct = other.on_construct;
        }
        if other.on_execute.is_some() {
            self.on_execute = other.on_execute;
        }
        if other.before_first_request.is_some() {
            self.before_first_request = other.before_first_request;
        }
    }

    pub fn run_create(
        &self,
        cx: &ImportContext,
        spec: &ModuleSpec,
        create: &mut dyn FnMut() -> Result<Option<ModuleHandle>>,
    ) -> Result<Option<ModuleHandle>> {
        match &self.on_construct {
            Some(policy) => policy.around_create(cx, spec, create),
            None => create(),
        }
    }

    pub fn run_exec(
        &self,
        cx: &ImportContext,
        module: &ModuleHandle,
        exec: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        match &self.on_execute {
            Some(policy) => policy.around_exec(cx, module, exec),
            None => exec(),
        }
    }
}

impl std::fmt::Debug for PatchEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchEntry")
            .field("on_construct", &self.on_construct.is_some())
            .field("on_execute", &self.on_execute.is_some())
            .field("before_first_request", &self.before_first_request.is_some())
            .finish()
    }
}

/// Serializable view of one registered policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySummary {
    pub module: String,
    pub on_construct: bool,
    pub on_execute: bool,
    pub before_first_request: bool,
}

/// Mutable registration phase. Re-registering a name merges hooks.
#[derive(Default)]
pub struct PatchRegistryBuilder {
    entries: BTreeMap<String, PatchEntry>,
}

impl PatchRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, entry: PatchEntry) -> &mut Self {
        self.entries.entry(name.into()).or_default().merge(entry);
        self
    }

    pub fn on_construct_policy(
        &mut self,
        name: impl Into<String>,
        policy: Arc<dyn ConstructPolicy>,
    ) -> &mut Self {
        self.register(
            name,
            PatchEntry {
                on_construct: Some(policy),
                ..PatchEntry::default()
            },
        )
    }

    pub fn on_construct<F>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn(
                &ImportContext,
                &ModuleSpec,
                &mut dyn FnMut() -> Result<Option<ModuleHandle>>,
            ) -> Result<Option<ModuleHandle>>
            + Send
            + Sync
            + 'static,
    {
        self.on_construct_policy(name, Arc::new(FnConstructPolicy(hook)))
    }

    pub fn on_execute_policy(&mut self, name: impl Into<String>, policy: Arc<dyn ExecPolicy>) -> &mut Self {
        self.register(
            name,
            PatchEntry {
                on_execute: Some(policy),
                ..PatchEntry::default()
            },
        )
    }

    pub fn on_execute<F>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn(&ImportContext, &ModuleHandle, &mut dyn FnMut() -> Result<()>) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.on_execute_policy(name, Arc::new(FnExecPolicy(hook)))
    }

    pub fn before_first_request<F>(&mut self, name: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(&ModuleHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.register(
            name,
            PatchEntry {
                before_first_request: Some(Arc::new(callback)),
                ..PatchEntry::default()
            },
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Freeze the registrations
    pub fn build(self) -> PatchRegistry {
        log::debug!("Patch registry frozen with {} entries", self.entries.len());
        PatchRegistry {
            entries: self.entries,
        }
    }
}

/// Read-only module name -> policy mapping
#[derive(Debug, Default)]
pub struct PatchRegistry {
    entries: BTreeMap<String, PatchEntry>,
}

impl PatchRegistry {
    pub fn builder() -> PatchRegistryBuilder {
        PatchRegistryBuilder::new()
    }

    /// Policy for `name`; `None` means load normally
    pub fn get(&self, name: &str) -> Option<&PatchEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn describe(&self) -> Vec<PolicySummary> {
        self.entries
            .iter()
            .map(|(module, entry)| PolicySummary {
                module: module.clone(),
                on_construct: entry.on_construct.is_some(),
                on_execute: entry.on_execute.is_some(),
                before_first_request: entry.before_first_request.is_some(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reregistration_merges_hooks() {
        let mut builder = PatchRegistry::builder();
        builder.on_execute("m", |_cx, _module, exec| exec());
        builder.before_first_request("m", |_module| Ok(()));
        builder.on_construct("m", |_cx, _spec, create| create());
        let registry = builder.build();

        let summary = &registry.describe()[0];
        assert_eq!(summary.module, "m");
        assert!(summary.on_construct);
        assert!(summary.on_execute);
        assert!(summary.before_first_request);
    }

    #[test]
    fn test_register_entry_keeps_unset_hooks() {
        let mut builder = PatchRegistry::builder();
        builder.before_first_request("m", |_module| Ok(()));
        builder.register("m", PatchEntry::default());
        let registry = builder.build();

        let entry = registry.get("m").unwrap();
        assert!(entry.before_first_request.is_some());
        assert!(entry.on_execute.is_none());
    }

    #[test]
    fn test_absent_name_means_no_policy() {
        let registry = PatchRegistry::builder().build();
        assert!(registry.get("json").is_none());
        assert!(registry.is_empty());
    }
}
