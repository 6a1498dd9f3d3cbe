//! seedbox: startup-time entropy sandbox for snapshotting runtimes
//! Keeps module loading deterministic until the first live request, then
//! restores real randomness exactly once.
//!
//! # Architecture
//!
//! ## Entropy Control ([`entropy`])
//! - [`entropy::gate`]: Process phase and the sandboxed entropy budget
//! - [`entropy::budget`]: Scoped allowances with leftover detection
//! - [`entropy::source`]: OS entropy source, disabled while armed
//! - [`entropy::primitives`]: Gated randomness helpers
//!
//! ## Modules ([`module`])
//! - [`module::object`]: Named attribute tables with callables
//! - [`module::facade`]: Call-blocking façade over a real module
//! - [`module::cache`]: Loaded-module cache holding real or blocked slots
//!
//! ## Host ([`host`])
//! - [`host::resolver`]: Resolver and loader traits, module specs
//! - [`host::import`]: Resolver chain and import entry point
//!
//! ## Patching ([`patch`])
//! - [`patch::registry`]: Per-module hooks, frozen after registration
//! - [`patch::interceptor`]: Resolver wrapping registered modules' loaders
//! - [`patch::builtin`]: Policies for well-known entropy-hungry modules
//!
//! ## Core ([`core`])
//! - [`core::state`]: Shared sandbox state
//! - [`core::lifecycle`]: `before_top_level` / `before_first_request`
//!
//! ## Observability ([`observability`])
//! - [`observability::events`]: Lifecycle events and transition reports
//!
//! ## Configuration ([`config`])
//! - [`config::settings`]: JSON configuration loading and validation
//! - [`config::types`]: Error types
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::fixtures`]: Scripted loaders and a static resolver
//! - [`testing::well_known`]: Simulated well-known modules
//!
//! # Invariants
//!
//! 1. **No entropy while sandboxed** unless a scoped allowance covers it
//! 2. **Allowances are exact** - unused draws are an error
//! 3. **Unregistered modules are untouched** by the interceptor
//! 4. **One transition** - concurrent first requests drain callbacks once

// Configuration
pub mod config;

// Entropy Control
pub mod entropy;

// Modules
pub mod module;

// Host module system
pub mod host;

// Patching
pub mod patch;

// Core
pub mod core;

// Observability
pub mod observability;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the seedbox binary
pub mod cli;

// Re-export commonly used types for convenience
pub use crate::config::settings::SandboxConfig;
pub use crate::config::types::*;
pub use crate::core::lifecycle::{LifecycleController, TransitionOutcome};
pub use crate::core::state::SandboxState;
pub use crate::entropy::gate::Phase;
pub use crate::patch::registry::{PatchRegistry, PatchRegistryBuilder};
