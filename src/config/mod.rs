//! Configuration and shared types
//!
//! Error taxonomy, JSON-backed settings and their validation.

pub mod settings;
pub mod types;
