//! Per-module patch policies and the import interceptor applying them.

pub mod builtin;
pub mod interceptor;
pub mod registry;
