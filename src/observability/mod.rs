//! Observability
//!
//! Ordered lifecycle events and the transition report.

pub mod events;
