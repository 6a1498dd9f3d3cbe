//! Module objects, call-blocking façades and the module cache.

pub mod cache;
pub mod facade;
pub mod object;
