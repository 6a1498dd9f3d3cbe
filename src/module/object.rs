use crate::config::types::{Result, SandboxError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Dynamic value passed to and returned from module functions
pub type Value = serde_json::Value;

/// Native function exposed as a module attribute
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Shared handle to a loaded module object
pub type ModuleHandle = Arc<ModuleObject>;

/// A module attribute: plain data or something callable
#[derive(Clone)]
pub enum Attribute {
    Data(Value),
    Function(NativeFn),
}

impl Attribute {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Attribute::Function(Arc::new(f))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Attribute::Function(_))
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Attribute::Data(value) => Some(value),
            Attribute::Function(_) => None,
        }
    }

    /// Invoke a callable attribute; `module`/`name` only feed the error
    pub fn call(&self, module: &str, name: &str, args: &[Value]) -> Result<Value> {
        match self {
            Attribute::Function(f) => f(args),
            Attribute::Data(_) => Err(SandboxError::NotCallable {
                module: module.to_string(),
                attribute: name.to_string(),
            }),
        }
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Attribute::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl From<Value> for Attribute {
    fn from(value: Value) -> Self {
        Attribute::Data(value)
    }
}

/// A module: a name plus a mutable attribute namespace
pub struct ModuleObject {
    name: String,
    attributes: RwLock<BTreeMap<String, Attribute>>,
}

impl ModuleObject {
    pub fn new(name: impl Into<String>) -> ModuleHandle {
        Arc::new(Self {
            name: name.into(),
            attributes: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Result<Attribute> {
        self.attributes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| SandboxError::AttributeNotFound {
                module: self.name.clone(),
                attribute: key.to_string(),
            })
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Attribute>) {
        self.attributes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn set_function<F>(&self, key: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.set(key, Attribute::function(f));
    }

    pub fn remove(&self, key: &str) -> Option<Attribute> {
        self.attributes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Attribute names in sorted order
    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn call(&self, key: &str, args: &[Value]) -> Result<Value> {
        // Clone out of the lock first; the callee may touch this module.
        let attribute = self.get(key)?;
        attribute.call(&self.name, key, args)
    }
}

impl fmt::Debug for ModuleObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleObject")
            .field("name", &self.name)
            .field("attributes", &self.attribute_names())
            .finish()
    }
}
