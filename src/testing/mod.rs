//! Testing infrastructure
//!
//! Scripted loaders, a static resolver and simulated well-known modules
//! for driving the sandbox without a real runtime.

pub mod fixtures;
pub mod well_known;

pub use fixtures::*;
pub use well_known::*;
