use crate::config::types::{Result, SandboxError};
use crate::host::resolver::{ModuleSpec, Resolver};
use crate::module::cache::{ModuleCache, ModuleSlot};
use crate::module::object::ModuleObject;
use std::sync::{Arc, PoisonError, RwLock};

/// In-process module system: an ordered resolver chain plus the module cache.
///
/// Modules load strictly one after another; the chain is snapshotted per
/// lookup so resolvers may import recursively without holding the lock.
pub struct ModuleHost {
    resolvers: RwLock<Vec<Arc<dyn Resolver>>>,
    cache: Arc<ModuleCache>,
}

impl ModuleHost {
    pub fn new() -> Self {
        Self {
            resolvers: RwLock::new(Vec::new()),
            cache: Arc::new(ModuleCache::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    /// Append a resolver at the back of the chain
    pub fn push_resolver(&self, resolver: Arc<dyn Resolver>) {
        self.resolvers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resolver);
    }

    /// Insert a resolver at the front of the chain
    pub fn insert_resolver_front(&self, resolver: Arc<dyn Resolver>) {
        self.resolvers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(0, resolver);
    }

    /// Drop every resolver matching `predicate`, returning how many went
    pub fn remove_resolvers<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Arc<dyn Resolver>) -> bool,
    {
        let mut resolvers = self.resolvers.write().unwrap_or_else(PoisonError::into_inner);
        let before = resolvers.len();
        resolvers.retain(|r| !predicate(r));
        before - resolvers.len()
    }

    /// Snapshot of the chain, front first
    pub fn resolvers(&self) -> Vec<Arc<dyn Resolver>> {
        self.resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn find_spec(&self, name: &str) -> Result<Option<ModuleSpec>> {
        let chain = self.resolvers();
        for resolver in &chain {
            if let Some(spec) = resolver.find_spec(name, &chain)? {
                return Ok(Some(spec));
            }
        }
        Ok(None)
    }

    /// Import `name`, returning whatever the cache holds once it has run
    pub fn import(&self, name: &str) -> Result<ModuleSlot> {
        if let Some(slot) = self.cache.get(name) {
            return Ok(slot);
        }

        let spec = self
            .find_spec(name)?
            .ok_or_else(|| SandboxError::ModuleNotFound(name.to_string()))?;

        let module = match spec.loader.create_module(&spec)? {
            Some(module) => module,
            None => ModuleObject::new(name),
        };
        self.cache.insert(name, ModuleSlot::Real(Arc::clone(&module)));

        log::debug!("Executing module '{}'", name);
        if let Err(err) = spec.loader.exec_module(&module) {
            self.cache.remove(name);
            return Err(err);
        }

        // exec may have swapped the cache entry (e.g. for a façade)
        Ok(self
            .cache
            .get(name)
            .unwrap_or(ModuleSlot::Real(module)))
    }

    pub fn invalidate_caches(&self) {
        for resolver in self.resolvers() {
            resolver.invalidate_caches();
        }
    }
}

impl Default for ModuleHost {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHost")
            .field("resolvers", &self.resolvers().len())
            .field("cached", &self.cache.names())
            .finish()
    }
}
