//! Call-Blocking Façade
//!
//! Stands in for a real module in the module cache while sandboxed. Data
//! attributes and allow-listed callables pass straight through; any other
//! callable is handed out as a stand-in that refuses to run until the first
//! request. Once unsandboxed every read is transparent, so a façade that
//! escaped into user code stays safe to keep using. Writes always land on
//! the real module.

use crate::config::types::{Result, SandboxError};
use crate::core::state::SandboxState;
use crate::module::object::{Attribute, ModuleHandle, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Callable names that stay usable while sandboxed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList(BTreeSet<String>);

impl AllowList {
    /// Block every callable
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for AllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Clone)]
pub struct BlockedModule {
    module: ModuleHandle,
    allowlist: AllowList,
    state: Arc<SandboxState>,
}

impl BlockedModule {
    pub fn new(module: ModuleHandle, allowlist: AllowList, state: Arc<SandboxState>) -> Self {
        Self {
            module,
            allowlist,
            state,
        }
    }

    /// The real module behind the façade
    pub fn module(&self) -> &ModuleHandle {
        &self.module
    }

    pub fn allowlist(&self) -> &AllowList {
        &self.allowlist
    }

    pub fn get_attr(&self, key: &str) -> Result<Attribute> {
        let attribute = self.module.get(key)?;
        if !self.state.is_sandboxed() || !attribute.is_callable() || self.allowlist.contains(key) {
            return Ok(attribute);
        }

        let state = Arc::clone(&self.state);
        let module_name = self.module.name().to_string();
        let key = key.to_string();
        Ok(Attribute::function(move |args: &[Value]| {
            if state.is_sandboxed() {
                log::warn!("Blocked call to {}.{}() before first request", module_name, key);
                return Err(SandboxError::UsedOutsideRequestContext {
                    module: module_name.clone(),
                    attribute: key.clone(),
                });
            }
            attribute.call(&module_name, &key, args)
        }))
    }

    pub fn set_attr(&self, key: impl Into<String>, value: impl Into<Attribute>) {
        self.module.set(key, value);
    }

    pub fn call(&self, key: &str, args: &[Value]) -> Result<Value> {
        self.get_attr(key)?.call(self.module.name(), key, args)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.module.attribute_names()
    }
}

impl std::fmt::Debug for BlockedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockedModule")
            .field("module", &self.module.name())
            .field("allowlist", &self.allowlist)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::SandboxConfig;
    use crate::module::object::ModuleObject;
    use serde_json::json;

    fn real_module() -> ModuleHandle {
        let module = ModuleObject::new("rnd");
        module.set("VERSION", json!(3));
        module.set_function("A", |_| Ok(json!("a")));
        module.set_function("B", |_| Ok(json!("b")));
        module
    }

    fn facade(state: &Arc<SandboxState>) -> BlockedModule {
        BlockedModule::new(real_module(), ["A"].into_iter().collect(), Arc::clone(state))
    }

    #[test]
    fn test_allowlisted_and_data_pass_through() {
        let state = SandboxState::new(&SandboxConfig::default());
        let blocked = facade(&state);

        assert_eq!(blocked.call("A", &[]).unwrap(), json!("a"));
        assert_eq!(blocked.get_attr("VERSION").unwrap().as_data(), Some(&json!(3)));
    }

    #[test]
    fn test_other_callables_fail_until_transition() {
        let state = SandboxState::new(&SandboxConfig::default());
        let blocked = facade(&state);

        let err = blocked.call("B", &[]).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::UsedOutsideRequestContext { ref module, ref attribute }
                if module == "rnd" && attribute == "B"
        ));

        // A stand-in fetched while sandboxed starts working after the transition.
        let stand_in = blocked.get_attr("B").unwrap();
        state.gate().enter_unsandboxed();
        assert_eq!(stand_in.call("rnd", "B", &[]).unwrap(), json!("b"));
        assert_eq!(blocked.call("B", &[]).unwrap(), json!("b"));
    }

    #[test]
    fn test_writes_reach_real_module() {
        let state = SandboxState::new(&SandboxConfig::default());
        let blocked = facade(&state);
        blocked.set_attr("flag", json!(true));
        assert_eq!(
            blocked.module().get("flag").unwrap().as_data(),
            Some(&json!(true))
        );
    }

    #[test]
    fn test_missing_attribute_is_reported() {
        let state = SandboxState::new(&SandboxConfig::default());
        let blocked = facade(&state);
        assert!(matches!(
            blocked.get_attr("C"),
            Err(SandboxError::AttributeNotFound { .. })
        ));
    }
}
