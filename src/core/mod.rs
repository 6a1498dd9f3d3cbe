//! Sandbox core.
//!
//! Shared state threaded through every component, and the controller that
//! arms the sandbox at startup and tears it down on the first request.

pub mod lifecycle;
pub mod state;
