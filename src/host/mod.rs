//! Host module system
//!
//! An ordered resolver chain with a cache, modelling how a dynamic runtime
//! finds, creates and executes modules.

pub mod import;
pub mod resolver;
