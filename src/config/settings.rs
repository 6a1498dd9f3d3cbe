//! Configuration loading from seedbox.json

use crate::config::types::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Environment variable naming a config file to load instead of ./seedbox.json
pub const CONFIG_ENV_VAR: &str = "SEEDBOX_CONFIG";

/// Default config file name looked up in the current directory
pub const DEFAULT_CONFIG_FILE: &str = "seedbox.json";

/// Sandbox settings consumed by the built-in policies and the entropy source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Register the built-in per-module policies
    pub builtin_policies: bool,
    /// Native-extension packages that seed a hash map (one entropy draw) at import
    pub rust_packages: Vec<String>,
    /// Per-module overrides of the built-in entropy allowances
    pub allowances: BTreeMap<String, u32>,
    /// Seed of the stream handed out for budgeted sandboxed draws
    pub deterministic_seed: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            builtin_policies: true,
            rust_packages: vec!["pydantic_core".to_string(), "tiktoken".to_string()],
            allowances: BTreeMap::new(),
            deterministic_seed: 0,
        }
    }
}

impl SandboxConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: SandboxConfig = serde_json::from_str(&content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from $SEEDBOX_CONFIG, then ./seedbox.json, then built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::load_from_file(path);
        }

        let config_path = std::env::current_dir()
            .map_err(|e| SandboxError::Config(format!("Failed to get current directory: {}", e)))?
            .join(DEFAULT_CONFIG_FILE);

        if !config_path.exists() {
            log::warn!(
                "{} not found in current directory, using built-in defaults",
                DEFAULT_CONFIG_FILE
            );
            return Ok(Self::default());
        }

        Self::load_from_file(config_path)
    }

    /// Load an explicit path if given, otherwise fall back to `load_default`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load_default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for name in &self.rust_packages {
            if name.trim().is_empty() {
                return Err(SandboxError::Config(
                    "rust_packages contains an empty module name".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(SandboxError::Config(format!(
                    "rust_packages lists '{}' more than once",
                    name
                )));
            }
        }

        if self.allowances.keys().any(|name| name.trim().is_empty()) {
            return Err(SandboxError::Config(
                "allowances contains an empty module name".to_string(),
            ));
        }

        Ok(())
    }

    /// Allowance for `module`, honouring overrides
    pub fn allowance_for(&self, module: &str, default: u32) -> u32 {
        self.allowances.get(module).copied().unwrap_or(default)
    }
}
