use crate::config::types::Result;
use crate::module::facade::BlockedModule;
use crate::module::object::{Attribute, ModuleHandle, Value};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// What the module cache holds for a name
#[derive(Clone, Debug)]
pub enum ModuleSlot {
    Real(ModuleHandle),
    Blocked(BlockedModule),
}

impl ModuleSlot {
    pub fn name(&self) -> &str {
        self.real().name()
    }

    /// The underlying module, looking through any façade
    pub fn real(&self) -> &ModuleHandle {
        match self {
            ModuleSlot::Real(module) => module,
            ModuleSlot::Blocked(blocked) => blocked.module(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, ModuleSlot::Blocked(_))
    }

    pub fn get_attr(&self, key: &str) -> Result<Attribute> {
        match self {
            ModuleSlot::Real(module) => module.get(key),
            ModuleSlot::Blocked(blocked) => blocked.get_attr(key),
        }
    }

    pub fn set_attr(&self, key: impl Into<String>, value: impl Into<Attribute>) {
        match self {
            ModuleSlot::Real(module) => module.set(key, value),
            ModuleSlot::Blocked(blocked) => blocked.set_attr(key, value),
        }
    }

    pub fn call(&self, key: &str, args: &[Value]) -> Result<Value> {
        match self {
            ModuleSlot::Real(module) => module.call(key, args),
            ModuleSlot::Blocked(blocked) => blocked.call(key, args),
        }
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.real().attribute_names()
    }
}

/// Name-keyed cache of loaded modules
#[derive(Debug, Default)]
pub struct ModuleCache {
    entries: RwLock<HashMap<String, ModuleSlot>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ModuleSlot> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Insert or replace, returning the previous slot
    pub fn insert(&self, name: impl Into<String>, slot: ModuleSlot) -> Option<ModuleSlot> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), slot)
    }

    pub fn remove(&self, name: &str) -> Option<ModuleSlot> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Cached names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
