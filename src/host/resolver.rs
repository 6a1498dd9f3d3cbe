//! Resolver chain contracts of the host module system.
//!
//! Import is a two-step affair: a [`Resolver`] turns a name into a
//! [`ModuleSpec`], and the spec's [`Loader`] first allocates the module
//! object (`create_module`) and then runs its top-level code
//! (`exec_module`). Interception hooks in between those two steps.

use crate::config::types::Result;
use crate::module::object::ModuleHandle;
use std::fmt;
use std::sync::Arc;

/// Allocates and executes one module
pub trait Loader: Send + Sync {
    /// Allocate the module object. `None` asks the host for a default one.
    fn create_module(&self, spec: &ModuleSpec) -> Result<Option<ModuleHandle>> {
        let _ = spec;
        Ok(None)
    }

    /// Run the module's top-level code
    fn exec_module(&self, module: &ModuleHandle) -> Result<()>;
}

/// One strategy in the ordered resolver chain
pub trait Resolver: Send + Sync {
    /// Locate `name`. `chain` is the full chain this lookup walks, in order.
    fn find_spec(&self, name: &str, chain: &[Arc<dyn Resolver>]) -> Result<Option<ModuleSpec>>;

    /// True only for the import patch interceptor
    fn is_patch_interceptor(&self) -> bool {
        false
    }

    fn invalidate_caches(&self) {}
}

/// Resolution result: where a module comes from and who loads it
#[derive(Clone)]
pub struct ModuleSpec {
    pub name: String,
    pub origin: Option<String>,
    pub loader: Arc<dyn Loader>,
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>, loader: Arc<dyn Loader>) -> Self {
        Self {
            name: name.into(),
            origin: None,
            loader,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Same spec, different loader
    pub fn with_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = loader;
        self
    }
}

impl fmt::Debug for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSpec")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Walk `chain` in order, skipping interceptors, and return the first spec
pub fn resolve_without_interceptors(
    name: &str,
    chain: &[Arc<dyn Resolver>],
) -> Result<Option<ModuleSpec>> {
    for resolver in chain {
        if resolver.is_patch_interceptor() {
            continue;
        }
        if let Some(spec) = resolver.find_spec(name, chain)? {
            return Ok(Some(spec));
        }
    }
    Ok(None)
}
