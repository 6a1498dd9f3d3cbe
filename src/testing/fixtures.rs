//! In-memory resolver and loader used by tests and the `simulate` command.

use crate::config::types::Result;
use crate::host::resolver::{Loader, ModuleSpec, Resolver};
use crate::module::object::{ModuleHandle, ModuleObject};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type ExecFn = dyn Fn(&ModuleHandle) -> Result<()> + Send + Sync;

/// Loader whose top-level code is a closure
pub struct ScriptedLoader {
    exec: Box<ExecFn>,
    custom_create: bool,
    creates: AtomicUsize,
    execs: AtomicUsize,
}

impl ScriptedLoader {
    pub fn new<F>(exec: F) -> Self
    where
        F: Fn(&ModuleHandle) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            exec: Box::new(exec),
            custom_create: false,
            creates: AtomicUsize::new(0),
            execs: AtomicUsize::new(0),
        }
    }

    /// Allocate the module object ourselves instead of deferring to the host
    pub fn with_custom_create(mut self) -> Self {
        self.custom_create = true;
        self
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn exec_count(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }
}

impl Loader for ScriptedLoader {
    fn create_module(&self, spec: &ModuleSpec) -> Result<Option<ModuleHandle>> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.custom_create {
            return Ok(Some(ModuleObject::new(spec.name.clone())));
        }
        Ok(None)
    }

    fn exec_module(&self, module: &ModuleHandle) -> Result<()> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        (self.exec)(module)
    }
}

/// Resolver over a fixed name -> loader table
#[derive(Default)]
pub struct StaticResolver {
    loaders: HashMap<String, Arc<dyn Loader>>,
    lookups: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loader(mut self, name: impl Into<String>, loader: impl Loader + 'static) -> Self {
        self.loaders.insert(name.into(), Arc::new(loader));
        self
    }

    pub fn with_shared_loader(mut self, name: impl Into<String>, loader: Arc<dyn Loader>) -> Self {
        self.loaders.insert(name.into(), loader);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, loader: Arc<dyn Loader>) {
        self.loaders.insert(name.into(), loader);
    }

    /// How many lookups this resolver has answered
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Resolver for StaticResolver {
    fn find_spec(&self, name: &str, _chain: &[Arc<dyn Resolver>]) -> Result<Option<ModuleSpec>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.loaders.get(name).map(|loader| {
            ModuleSpec::new(name, Arc::clone(loader)).with_origin(format!("static:{}", name))
        }))
    }
}
